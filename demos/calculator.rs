//! Registers a calculator service and drives a few calls through the router.
//!
//! ```text
//! RUST_LOG=remoting=debug cargo run --example calculator
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use remoting::context::Identity;
use remoting::http::{Method, Request};
use remoting::registry::{ContextInitializer, MethodSpec, ServerCache, XmlDocument};
use remoting::security::TOKEN_HEADER;
use remoting::{Context, Dispatcher, Registry, Router, ServiceType, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
#[error("cannot divide {0} by zero")]
struct DivideByZero(f64);

#[derive(Default)]
struct Calculator {
    user: String,
}

impl ContextInitializer for Calculator {
    fn initialize_context(&mut self, ctx: &Context) {
        self.user = ctx.user().name().to_owned();
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(
        ServiceType::<Calculator>::new("Demo.Calculator")
            .constructor(Calculator::default)
            .context_initializer()
            .method(
                MethodSpec::new("Add")
                    .params(["a", "b"])
                    .server_cache(ServerCache::new(Duration::from_secs(60))),
                |_calc: Calculator, (a, b): (f64, f64)| async move { Ok::<_, Infallible>(a + b) },
            )
            .static_method(
                MethodSpec::new("Divide").params(["a", "b"]),
                |(a, b): (f64, f64)| async move {
                    if b == 0.0 {
                        Err(DivideByZero(a))
                    } else {
                        Ok(a / b)
                    }
                },
            )
            .method("WhoAmI", |calc: Calculator, (): ()| async move {
                Ok::<_, Infallible>(calc.user)
            })
            .static_method(MethodSpec::new("Describe").params(["a"]), |(a,): (f64,)| async move {
                XmlDocument::element("number", &a.to_string())
            }),
    );
    registry
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "remoting=debug".into()),
        )
        .init();

    let settings = Settings::from_json(r#"{"token": {"mode": "site_key", "key": "demo"}}"#)?;
    let router = Router::new(Arc::new(registry()), Dispatcher::in_memory(), settings)?;

    let user = Identity::user("demo-user");
    let issuer = Context::new(Request::new(Method::Post, "/")).with_user(user.clone());
    let token = router.settings().token.issue(&issuer).unwrap_or_default();

    let calls = [
        (Method::Post, "/rpc/Demo.Calculator/Add", r#"{"a": 2, "b": 3}"#, None),
        (Method::Post, "/rpc/Demo.Calculator/add", r#"{"b": 3, "a": 2}"#, None),
        (Method::Post, "/rpc/Demo.Calculator/Divide", r#"{"a": 1, "b": 0}"#, None),
        (Method::Post, "/rpc/Demo.Calculator/WhoAmI", "", None),
        (Method::Get, "/rpc/Demo.Calculator/Describe", "", Some("a=1.5")),
    ];

    for (method, path, body, query) in calls {
        let mut request = Request::new(method, path)
            .header(TOKEN_HEADER, token.clone())
            .body(body);
        if let Some(query) = query {
            request = request.query(query);
        }

        let response = router.handle(Context::new(request).with_user(user.clone())).await;
        println!(
            "{path} -> {} {}",
            response.status(),
            response.body_str().unwrap_or("<binary>")
        );
    }

    // Without the token the call is refused.
    let request = Request::new(Method::Post, "/rpc/Demo.Calculator/Add").body(r#"{"a":1,"b":1}"#);
    let response = router.handle(Context::new(request).with_user(user)).await;
    println!("no token -> {}", response.body_str().unwrap_or("<binary>"));

    Ok(())
}
