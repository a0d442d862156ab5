//! # remoting
//!
//! Serves browser-initiated remote method calls against services registered
//! in a [`Registry`].
//!
//! A request names a service and a method. The [`Router`] resolves both,
//! picks a [`Processor`](processor::Processor) that knows how to read the
//! parameters, and hands the bound call to the [`Dispatcher`], which checks
//! the call token, consults the server-side cache, invokes the method and
//! writes either the serialized result or a serialized error payload.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! use remoting::{Context, Dispatcher, Registry, Router, Settings};
//! use remoting::http::{Method, Request};
//! use remoting::registry::{MethodSpec, ServiceType};
//!
//! #[derive(Default)]
//! struct Calculator;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut registry = Registry::new();
//!     registry.register(
//!         ServiceType::<Calculator>::new("Demo.Calculator")
//!             .constructor(Calculator::default)
//!             .method(
//!                 MethodSpec::new("Add").params(["a", "b"]),
//!                 |_calc, (a, b): (i64, i64)| async move { Ok::<_, Infallible>(a + b) },
//!             ),
//!     );
//!
//!     let router =
//!         Router::new(Arc::new(registry), Dispatcher::in_memory(), Settings::default()).unwrap();
//!     let request =
//!         Request::new(Method::Post, "/rpc/Demo.Calculator/Add").body(r#"{"a":1,"b":2}"#);
//!     let response = router.handle(Context::new(request)).await;
//!
//!     assert_eq!(response.body_str(), Some(r#"{"value":3}"#));
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod processor;
pub mod registry;
pub mod router;
pub mod security;

pub use cache::{Cache, MemoryCache};
pub use config::Settings;
pub use context::Context;
pub use dispatch::Dispatcher;
pub use error::{ErrorPayload, FailureKind, RpcError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use registry::{Registry, ServiceType};
pub use router::Router;
