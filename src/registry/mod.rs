//! The dispatch table: services, their methods, and how to call them.
//!
//! Services are registered once at startup. Each method is turned into a
//! type-erased invoker that knows how to bind its parameters, build an
//! instance when it needs one, and convert the result into a [`Reply`].
//! Nothing is looked up by reflection while a request is being served.
//!
//! ```
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use remoting::registry::{MethodSpec, Registry, ServerCache, ServiceType};
//!
//! #[derive(Default)]
//! struct Calculator;
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     ServiceType::<Calculator>::new("Demo.Calculator")
//!         .constructor(Calculator::default)
//!         .method(
//!             MethodSpec::new("Add")
//!                 .params(["a", "b"])
//!                 .server_cache(ServerCache::new(Duration::from_secs(30))),
//!             |_calc: Calculator, (a, b): (i64, i64)| async move { Ok::<_, Infallible>(a + b) },
//!         )
//!         .static_method("Version", |(): ()| async { Ok::<_, Infallible>("1.0") }),
//! );
//!
//! let service = registry.service("Demo.Calculator").unwrap();
//! assert!(service.method("add").is_some());
//! assert!(service.method("VERSION").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Result, RpcError};

mod reply;

pub use reply::{
    EncodeJson, IntoReply, InvalidXmlName, Json, Reply, XML_CONTENT_TYPE, XmlDocument,
};

/// A pinned, boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The future of a call whose parameters are bound and whose instance, if
/// any, is built.
pub type Invocation = BoxFuture<'static, Result<Reply>>;

type StaticInvoker = Arc<dyn Fn(Vec<Value>) -> Result<Invocation> + Send + Sync>;
type InstanceInvoker = Arc<dyn Fn(&Context, Vec<Value>) -> Result<Invocation> + Send + Sync>;
type BoundInstanceCall<T> = Box<dyn FnOnce(T) -> Invocation + Send>;
type InstanceBinder<T> = Arc<dyn Fn(Vec<Value>) -> Result<BoundInstanceCall<T>> + Send + Sync>;

/// Optional capability of a service instance: receive the request context
/// after construction and before the method runs.
pub trait ContextInitializer {
    fn initialize_context(&mut self, ctx: &Context);
}

/// Server-side caching policy for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCache {
    pub enabled: bool,
    pub duration: Duration,
}

impl ServerCache {
    /// An enabled policy keeping results for `duration`.
    pub fn new(duration: Duration) -> Self {
        Self {
            enabled: true,
            duration,
        }
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Name, parameter names and cache policies of a method being registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    name: String,
    params: Vec<String>,
    server_cache: Vec<ServerCache>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            server_cache: Vec::new(),
        }
    }

    /// Declares parameter names in call order.
    #[must_use]
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = names.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a cache policy. Only the first one is consulted.
    #[must_use]
    pub fn server_cache(mut self, policy: ServerCache) -> Self {
        self.server_cache.push(policy);
        self
    }
}

impl From<&str> for MethodSpec {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MethodSpec {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Called without an instance.
    Static,
    /// Called on a freshly constructed instance of the service.
    Instance,
}

enum Target {
    Static(StaticInvoker),
    Instance(InstanceInvoker),
}

/// A registered, callable method.
pub struct MethodDescriptor {
    service: String,
    name: String,
    params: Vec<String>,
    server_cache: Vec<ServerCache>,
    target: Target,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full name of the owning service.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn server_cache(&self) -> &[ServerCache] {
        &self.server_cache
    }

    pub fn kind(&self) -> MethodKind {
        match self.target {
            Target::Static(_) => MethodKind::Static,
            Target::Instance(_) => MethodKind::Instance,
        }
    }

    /// Binds `params` and, for instance methods, constructs and initializes
    /// the instance. The returned future runs the method itself.
    pub(crate) fn bind(&self, ctx: &Context, params: Vec<Value>) -> Result<Invocation> {
        match &self.target {
            Target::Static(invoke) => invoke(params),
            Target::Instance(invoke) => invoke(ctx, params),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("kind", &self.kind())
            .field("server_cache", &self.server_cache)
            .finish()
    }
}

/// A registered service and its methods.
#[derive(Debug)]
pub struct ServiceDescriptor {
    full_name: String,
    has_constructor: bool,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl ServiceDescriptor {
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Whether instance methods of this service can be called at all.
    pub fn has_constructor(&self) -> bool {
        self.has_constructor
    }

    /// Looks a method up by name, ignoring ASCII case.
    pub fn method(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        self.methods.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values().map(Arc::as_ref)
    }
}

enum Pending<T> {
    Static(StaticInvoker),
    Instance(InstanceBinder<T>),
}

/// Builder describing service type `T` before it goes into a [`Registry`].
pub struct ServiceType<T> {
    full_name: String,
    constructor: Option<Arc<dyn Fn() -> T + Send + Sync>>,
    initializer: Option<fn(&mut T, &Context)>,
    methods: Vec<(MethodSpec, Pending<T>)>,
}

impl<T> ServiceType<T>
where
    T: Send + 'static,
{
    /// `full_name` is the name clients address the service by.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            constructor: None,
            initializer: None,
            methods: Vec::new(),
        }
    }

    /// The parameterless constructor used for every instance-method call.
    #[must_use]
    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }

    /// Hands the request context to each new instance before its method runs.
    #[must_use]
    pub fn context_initializer(mut self) -> Self
    where
        T: ContextInitializer,
    {
        self.initializer = Some(<T as ContextInitializer>::initialize_context);
        self
    }

    /// Registers a method that runs on a new instance of `T`.
    ///
    /// Parameters are bound to `A` as a tuple in declaration order.
    #[must_use]
    pub fn method<A, F, Fut, R, E>(mut self, spec: impl Into<MethodSpec>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(T, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: IntoReply,
        E: std::error::Error + Send + Sync + 'static,
    {
        let spec = spec.into();
        let label = format!("{}.{}", self.full_name, spec.name);
        let f = Arc::new(f);
        let binder: InstanceBinder<T> =
            Arc::new(move |params: Vec<Value>| -> Result<BoundInstanceCall<T>> {
                let args: A = bind_args(&label, params)?;
                let f = Arc::clone(&f);
                let label = label.clone();
                let call: BoundInstanceCall<T> = Box::new(move |instance: T| -> Invocation {
                    let call = f(instance, args);
                    Box::pin(async move {
                        call.await
                            .map(IntoReply::into_reply)
                            .map_err(|e| RpcError::invocation(label, e))
                    })
                });
                Ok(call)
            });
        self.methods.push((spec, Pending::Instance(binder)));
        self
    }

    /// Registers a method that needs no instance.
    #[must_use]
    pub fn static_method<A, F, Fut, R, E>(mut self, spec: impl Into<MethodSpec>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: IntoReply,
        E: std::error::Error + Send + Sync + 'static,
    {
        let spec = spec.into();
        let label = format!("{}.{}", self.full_name, spec.name);
        let invoker: StaticInvoker = Arc::new(move |params: Vec<Value>| -> Result<Invocation> {
            let args: A = bind_args(&label, params)?;
            let call = f(args);
            let label = label.clone();
            Ok(Box::pin(async move {
                call.await
                    .map(IntoReply::into_reply)
                    .map_err(|e| RpcError::invocation(label, e))
            }))
        });
        self.methods.push((spec, Pending::Static(invoker)));
        self
    }

    fn into_descriptor(self) -> ServiceDescriptor {
        let Self {
            full_name,
            constructor,
            initializer,
            methods,
        } = self;

        let has_constructor = constructor.is_some();
        let mut table = HashMap::with_capacity(methods.len());

        for (spec, pending) in methods {
            let target = match pending {
                Pending::Static(invoke) => Target::Static(invoke),
                Pending::Instance(binder) => {
                    if !has_constructor {
                        warn!(
                            service = %full_name,
                            method = %spec.name,
                            "instance method registered on a service without a parameterless constructor"
                        );
                    }
                    let constructor = constructor.clone();
                    let service = full_name.clone();
                    Target::Instance(Arc::new(
                        move |ctx: &Context, params: Vec<Value>| -> Result<Invocation> {
                            let call = binder(params)?;
                            let construct = constructor.as_ref().ok_or_else(|| {
                                RpcError::NoConstructor {
                                    service: service.clone(),
                                }
                            })?;
                            let mut instance = construct();
                            if let Some(initialize) = initializer {
                                initialize(&mut instance, ctx);
                            }
                            Ok(call(instance))
                        },
                    ))
                }
            };

            let key = spec.name.to_ascii_lowercase();
            let descriptor = MethodDescriptor {
                service: full_name.clone(),
                name: spec.name,
                params: spec.params,
                server_cache: spec.server_cache,
                target,
            };
            if table.insert(key, Arc::new(descriptor)).is_some() {
                warn!(service = %full_name, "method registered twice; keeping the last one");
            }
        }

        ServiceDescriptor {
            full_name,
            has_constructor,
            methods: table,
        }
    }
}

fn bind_args<A>(method: &str, params: Vec<Value>) -> Result<A>
where
    A: DeserializeOwned,
{
    let value = if params.is_empty() {
        Value::Null
    } else {
        Value::Array(params)
    };
    serde_json::from_value(value).map_err(|source| RpcError::Arguments {
        method: method.to_owned(),
        source,
    })
}

/// All services callable through this crate, keyed by full name.
#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service, replacing any earlier one with the same full name.
    pub fn register<T>(&mut self, service: ServiceType<T>) -> &mut Self
    where
        T: Send + 'static,
    {
        let descriptor = service.into_descriptor();
        debug!(
            service = %descriptor.full_name,
            methods = descriptor.methods.len(),
            "service registered"
        );
        if let Some(old) = self
            .services
            .insert(descriptor.full_name.clone(), Arc::new(descriptor))
        {
            warn!(service = %old.full_name, "service registered twice; keeping the last one");
        }
        self
    }

    /// Looks a service up by its exact full name.
    pub fn service(&self, full_name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.get(full_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use thiserror::Error;

    use super::*;
    use crate::http::{Method, Request};

    #[derive(Debug, Error)]
    #[error("nope")]
    struct Nope;

    struct Greeter {
        greeting: String,
    }

    impl ContextInitializer for Greeter {
        fn initialize_context(&mut self, ctx: &Context) {
            self.greeting = format!("{} {}", self.greeting, ctx.user().name());
        }
    }

    fn ctx() -> Context {
        Context::new(Request::new(Method::Post, "/"))
            .with_user(crate::context::Identity::user("ada"))
    }

    async fn run(method: &MethodDescriptor, params: Vec<Value>) -> Result<Value> {
        match method.bind(&ctx(), params)?.await? {
            Reply::Value(v) => Ok(v.encode()?),
            Reply::Document(d) => Ok(Value::String(d.to_xml())),
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            ServiceType::<Greeter>::new("Demo.Greeter")
                .constructor(|| Greeter {
                    greeting: "hello".to_owned(),
                })
                .context_initializer()
                .method("Greet", |g: Greeter, (): ()| async move {
                    Ok::<_, Infallible>(g.greeting)
                })
                .static_method(
                    MethodSpec::new("Echo").params(["text"]),
                    |(text,): (String,)| async move { Ok::<_, Infallible>(text) },
                )
                .static_method("Fail", |(): ()| async { Err::<(), _>(Nope) }),
        );
        registry
    }

    #[tokio::test]
    async fn method_lookup_ignores_case() {
        let registry = registry();
        let service = registry.service("Demo.Greeter").unwrap();
        assert!(service.method("greet").is_some());
        assert!(service.method("ECHO").is_some());
        assert!(service.method("missing").is_none());
        assert!(registry.service("demo.greeter").is_none());
    }

    #[tokio::test]
    async fn instance_method_sees_initialized_context() {
        let service = registry().service("Demo.Greeter").unwrap();
        let greet = service.method("Greet").unwrap();
        assert_eq!(greet.kind(), MethodKind::Instance);
        assert_eq!(run(&greet, vec![]).await.unwrap(), json!("hello ada"));
    }

    #[tokio::test]
    async fn static_method_binds_tuple_params() {
        let service = registry().service("Demo.Greeter").unwrap();
        let echo = service.method("echo").unwrap();
        assert_eq!(echo.kind(), MethodKind::Static);
        assert_eq!(echo.params(), ["text".to_owned()]);
        assert_eq!(run(&echo, vec![json!("hi")]).await.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn mismatched_params_are_binding_errors() {
        let service = registry().service("Demo.Greeter").unwrap();
        let echo = service.method("echo").unwrap();
        let err = run(&echo, vec![json!(5)]).await.unwrap_err();
        assert!(matches!(err, RpcError::Arguments { .. }), "{err:?}");
        let err = run(&echo, vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Arguments { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn method_errors_are_wrapped() {
        let service = registry().service("Demo.Greeter").unwrap();
        let fail = service.method("fail").unwrap();
        let err = run(&fail, vec![]).await.unwrap_err();
        match err {
            RpcError::Invocation { method, source, .. } => {
                assert_eq!(method, "Demo.Greeter.Fail");
                assert_eq!(source.to_string(), "nope");
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_constructor_fails_per_call_without_invoking() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct NoDefault;

        let mut registry = Registry::new();
        registry.register(ServiceType::<NoDefault>::new("Demo.NoDefault").method(
            "Touch",
            |_: NoDefault, (): ()| async {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            },
        ));
        let service = registry.service("Demo.NoDefault").unwrap();
        assert!(!service.has_constructor());

        let err = run(&service.method("touch").unwrap(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::NoConstructor { ref service } if service == "Demo.NoDefault"
        ));
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reregistering_replaces_service() {
        let mut registry = registry();
        registry.register(ServiceType::<Greeter>::new("Demo.Greeter"));
        assert_eq!(registry.len(), 1);
        assert!(registry.service("Demo.Greeter").unwrap().method("greet").is_none());
    }
}
