//! Maps host requests onto registered services.
//!
//! [`Router`] resolves the service and method a request addresses, picks the
//! processor for the HTTP method and hands the bound call to the
//! [`Dispatcher`]. Paths follow one of two shapes under the route prefix:
//!
//! | Request                               | Service           | Method             |
//! |---------------------------------------|-------------------|--------------------|
//! | `POST /rpc/Demo.Calculator/Add`       | `Demo.Calculator` | `Add`              |
//! | `POST /rpc/Demo.Calculator`           | `Demo.Calculator` | from [`METHOD_HEADER`] |
//! | `GET  /rpc/Demo.Calculator/Add?a=1&b=2` | `Demo.Calculator` | `Add`            |
//!
//! [`METHOD_HEADER`] overrides the method segment when both are present.
//! `POST` bodies are read by [`JsonProcessor`], `GET` query strings by
//! [`QueryProcessor`].
//!
//! Routing failures are the only responses with a non-`200` status: once a
//! call is bound, every outcome is reported in the body.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigError, Settings};
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::http::{Method, Response, StatusCode};
use crate::processor::{BoundCall, JsonProcessor, Processor, QueryProcessor};
use crate::registry::Registry;
use crate::security::ImpersonationToken;

/// Request header naming the method to call.
pub const METHOD_HEADER: &str = "X-Remoting-Method";

/// Routes requests for one [`Registry`].
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
/// use std::sync::Arc;
///
/// use remoting::config::Settings;
/// use remoting::context::Context;
/// use remoting::dispatch::Dispatcher;
/// use remoting::http::{Method, Request};
/// use remoting::registry::{MethodSpec, Registry, ServiceType};
/// use remoting::router::Router;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut registry = Registry::new();
/// registry.register(ServiceType::<()>::new("Demo.Echo").static_method(
///     MethodSpec::new("Shout").params(["text"]),
///     |(text,): (String,)| async move { Ok::<_, Infallible>(text.to_uppercase()) },
/// ));
///
/// let router =
///     Router::new(Arc::new(registry), Dispatcher::in_memory(), Settings::default()).unwrap();
/// let request = Request::new(Method::Post, "/rpc/Demo.Echo/shout").body(r#"{"text":"hi"}"#);
/// let response = router.handle(Context::new(request)).await;
///
/// assert_eq!(response.body_str(), Some(r#"{"value":"HI"}"#));
/// # }
/// ```
pub struct Router {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    settings: Settings,
    json: Arc<dyn Processor>,
    query: Arc<dyn Processor>,
}

impl Router {
    /// Fails when `settings` would not route anything, such as a route
    /// prefix without a leading `/`.
    pub fn new(
        registry: Arc<Registry>,
        dispatcher: Dispatcher,
        settings: Settings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            json: Arc::new(JsonProcessor::new(settings.token.clone())),
            query: Arc::new(QueryProcessor::new(settings.token.clone())),
            registry,
            dispatcher,
            settings,
        })
    }

    /// Replaces the processor used for `POST` requests.
    #[must_use]
    pub fn with_post_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.json = processor;
        self
    }

    /// Replaces the processor used for `GET` requests.
    #[must_use]
    pub fn with_get_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.query = processor;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serves one request.
    ///
    /// An [`ImpersonationToken`] in the context's extensions makes the call
    /// run under that identity.
    pub async fn handle(&self, ctx: Context) -> Response {
        let processor = match ctx.request().method() {
            Method::Post => Arc::clone(&self.json),
            Method::Get => Arc::clone(&self.query),
            other => {
                debug!(method = %other.as_str(), "method not allowed");
                return Response::new(StatusCode::MethodNotAllowed)
                    .header("Allow", "GET, POST")
                    .body_text("only GET and POST are supported");
            }
        };

        let Some((service_name, segment)) = self.target(ctx.request().path()) else {
            return not_found(format!("no service at {}", ctx.request().path()));
        };

        let method_name = ctx
            .request()
            .headers()
            .get(METHOD_HEADER)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(segment);
        let Some(method_name) = method_name else {
            return Response::new(StatusCode::BadRequest).body_text("no method was named");
        };

        let Some(service) = self.registry.service(service_name) else {
            return not_found(format!("unknown service {service_name}"));
        };
        let Some(method) = service.method(method_name) else {
            return not_found(format!("{service_name} has no method {method_name}"));
        };

        debug!(
            service = %service.full_name(),
            method = %method.name(),
            processor = %processor.name(),
            "routing call"
        );

        if self.settings.trace {
            ctx.trace().enable();
        }
        let impersonation = ctx.extensions().get::<ImpersonationToken>().cloned();

        let mut call = BoundCall::new(processor, service, method, ctx);
        if let Some(token) = impersonation {
            call = call.with_impersonation(token);
        }
        self.dispatcher.run(call).await
    }

    // Splits `{prefix}/{service}[/{method}]` into its service and method parts.
    fn target<'a>(&self, path: &'a str) -> Option<(&'a str, Option<&'a str>)> {
        let rest = path.strip_prefix(self.settings.normalized_prefix())?;
        let rest = rest.strip_prefix('/')?.trim_end_matches('/');
        let (service, method) = match rest.split_once('/') {
            Some((service, method)) if !method.contains('/') => (service, Some(method)),
            Some(_) => return None,
            None => (rest, None),
        };
        (!service.is_empty()).then_some((service, method.filter(|m| !m.is_empty())))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("services", &self.registry.len())
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .field("post", &self.json.name())
            .field("get", &self.query.name())
            .finish()
    }
}

fn not_found(message: String) -> Response {
    debug!(%message, "not found");
    Response::new(StatusCode::NotFound).body_text(message)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use serde_json::{Value, json};

    use super::*;
    use crate::context::Identity;
    use crate::http::Request;
    use crate::registry::{MethodSpec, ServiceType};
    use crate::security::{IdentityImpersonator, TOKEN_HEADER, TokenPolicy};

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register(
            ServiceType::<()>::new("Demo.Math")
                .static_method(
                    MethodSpec::new("Add").params(["a", "b"]),
                    |(a, b): (i64, i64)| async move { Ok::<_, Infallible>(a + b) },
                )
                .static_method("Ping", |(): ()| async { Ok::<_, Infallible>("pong") }),
        );
        Arc::new(registry)
    }

    fn router() -> Router {
        Router::new(registry(), Dispatcher::in_memory(), Settings::default()).unwrap()
    }

    fn json_body(response: &Response) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn target_splits_service_and_method() {
        let router = router();
        assert_eq!(router.target("/rpc/Demo.Math/Add"), Some(("Demo.Math", Some("Add"))));
        assert_eq!(router.target("/rpc/Demo.Math/Add/"), Some(("Demo.Math", Some("Add"))));
        assert_eq!(router.target("/rpc/Demo.Math"), Some(("Demo.Math", None)));
        assert_eq!(router.target("/rpc/"), None);
        assert_eq!(router.target("/rpcx/Demo.Math"), None);
        assert_eq!(router.target("/rpc/a/b/c"), None);
        assert_eq!(router.target("/other/Demo.Math"), None);
    }

    #[test]
    fn root_prefix() {
        let router = Router::new(
            registry(),
            Dispatcher::in_memory(),
            Settings::default().route_prefix("/"),
        )
        .unwrap();
        assert_eq!(router.target("/Demo.Math/Ping"), Some(("Demo.Math", Some("Ping"))));
    }

    #[test]
    fn prefix_without_leading_slash_is_refused() {
        let err = Router::new(
            registry(),
            Dispatcher::in_memory(),
            Settings::default().route_prefix("api"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RoutePrefix(ref prefix) if prefix == "api"));

        assert!(
            Router::new(
                registry(),
                Dispatcher::in_memory(),
                Settings::default().route_prefix(""),
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn post_uses_json_body() {
        let request = Request::new(Method::Post, "/rpc/Demo.Math/add").body(r#"{"a":2,"b":5}"#);
        let response = router().handle(Context::new(request)).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(json_body(&response), json!({"value": 7}));
    }

    #[tokio::test]
    async fn get_uses_query_string() {
        let request = Request::new(Method::Get, "/rpc/Demo.Math/Add").query("a=1&b=2");
        let response = router().handle(Context::new(request)).await;
        assert_eq!(json_body(&response), json!({"value": 3}));
    }

    #[tokio::test]
    async fn method_header_wins_over_path() {
        let request =
            Request::new(Method::Post, "/rpc/Demo.Math/Add").header(METHOD_HEADER, "ping");
        let response = router().handle(Context::new(request)).await;
        assert_eq!(json_body(&response), json!({"value": "pong"}));

        let request = Request::new(Method::Post, "/rpc/Demo.Math").header(METHOD_HEADER, "Ping");
        let response = router().handle(Context::new(request)).await;
        assert_eq!(json_body(&response), json!({"value": "pong"}));
    }

    #[tokio::test]
    async fn routing_failures_use_status_codes() {
        let router = router();
        let cases = [
            (Request::new(Method::Post, "/elsewhere"), StatusCode::NotFound),
            (Request::new(Method::Post, "/rpc/Demo.Nope/Add"), StatusCode::NotFound),
            (Request::new(Method::Post, "/rpc/demo.math/Add"), StatusCode::NotFound),
            (Request::new(Method::Post, "/rpc/Demo.Math/Sub"), StatusCode::NotFound),
            (Request::new(Method::Post, "/rpc/Demo.Math"), StatusCode::BadRequest),
            (
                Request::new("PUT".parse().unwrap(), "/rpc/Demo.Math/Add"),
                StatusCode::MethodNotAllowed,
            ),
        ];
        for (request, status) in cases {
            let path = request.path().to_owned();
            let response = router.handle(Context::new(request)).await;
            assert_eq!(response.status(), status, "{path}");
        }
    }

    #[tokio::test]
    async fn method_not_allowed_lists_allowed_methods() {
        let request = Request::new("DELETE".parse().unwrap(), "/rpc/Demo.Math/Add");
        let response = router().handle(Context::new(request)).await;
        assert_eq!(response.headers().get("allow"), Some("GET, POST"));
    }

    #[tokio::test]
    async fn settings_token_applies_to_both_processors() {
        let router = Router::new(
            registry(),
            Dispatcher::in_memory(),
            Settings::default().token(TokenPolicy::SiteKey("k".into())),
        )
        .unwrap();

        let request = Request::new(Method::Get, "/rpc/Demo.Math/Ping");
        let response = router.handle(Context::new(request)).await;
        assert_eq!(json_body(&response)["error"]["type"], "SecurityError");

        let ctx = Context::new(Request::new(Method::Post, "/rpc/Demo.Math/Ping"));
        let token = router.settings().token.issue(&ctx).unwrap();
        let request = Request::new(Method::Post, "/rpc/Demo.Math/Ping").header(TOKEN_HEADER, token);
        let response = router.handle(Context::new(request)).await;
        assert_eq!(json_body(&response), json!({"value": "pong"}));
    }

    #[tokio::test]
    async fn trace_setting_enables_trace() {
        let router = Router::new(
            registry(),
            Dispatcher::in_memory(),
            Settings::default().trace(true),
        )
        .unwrap();
        let ctx = Context::new(Request::new(Method::Post, "/rpc/Demo.Math/Ping"));
        let trace = ctx.trace_handle();
        router.handle(ctx).await;
        assert!(trace.is_enabled());
        assert_eq!(trace.entries().first().unwrap().message, "begin request");
    }

    #[tokio::test]
    async fn impersonation_token_comes_from_extensions() {
        let impersonator = Arc::new(IdentityImpersonator::new([(
            ImpersonationToken::new("batch"),
            Identity::user("batch-runner"),
        )]));
        let router = Router::new(
            registry(),
            Dispatcher::in_memory().with_impersonator(impersonator.clone()),
            Settings::default(),
        )
        .unwrap();

        let mut ctx = Context::new(Request::new(Method::Post, "/rpc/Demo.Math/Ping"));
        ctx.extensions_mut().insert(ImpersonationToken::new("batch"));
        let response = router.handle(ctx).await;
        assert_eq!(json_body(&response), json!({"value": "pong"}));
        assert_eq!(impersonator.active_scopes(), 0);

        let mut ctx = Context::new(Request::new(Method::Post, "/rpc/Demo.Math/Ping"));
        ctx.extensions_mut().insert(ImpersonationToken::new("unknown"));
        let response = router.handle(ctx).await;
        assert_eq!(json_body(&response)["error"]["type"], "ImpersonationError");
    }
}
