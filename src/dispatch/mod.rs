//! Runs one bound call to completion and produces its response.
//!
//! [`Dispatcher::run`] is linear: impersonate, mark the response
//! non-cacheable, check the call token, read parameters, answer from the
//! server cache if possible, invoke, write the result, cache it. Every step
//! that fails ends the call with a serialized error payload in the body of a
//! `200 OK`. Nothing is ever returned to the host as an error.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheOptions, MemoryCache};
use crate::error::{Result, RpcError};
use crate::http::{Response, StatusCode};
use crate::processor::BoundCall;
use crate::registry::{MethodKind, Reply, XML_CONTENT_TYPE};
use crate::security::{ImpersonationGuard, Impersonator, TOKEN_HEADER};

/// Response header set when the body came from the server cache.
pub const CACHE_HEADER: &str = "X-Remoting-Cache";

/// Category of every entry the dispatcher writes to the request trace.
pub const TRACE_CATEGORY: &str = "remoting";

/// Executes bound calls against an injected cache.
///
/// Cheap to clone; clones share the cache and impersonator.
#[derive(Clone)]
pub struct Dispatcher {
    cache: Arc<dyn Cache>,
    impersonator: Option<Arc<dyn Impersonator>>,
}

impl Dispatcher {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            impersonator: None,
        }
    }

    /// A dispatcher with its own unbounded [`MemoryCache`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    /// Used for calls that carry an impersonation token. Without one, such
    /// calls run as the requesting user.
    #[must_use]
    pub fn with_impersonator(mut self, impersonator: Arc<dyn Impersonator>) -> Self {
        self.impersonator = Some(impersonator);
        self
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Serves `call` and returns the response to send.
    pub async fn run(&self, call: BoundCall) -> Response {
        let trace = call.context().trace();
        trace.write(TRACE_CATEGORY, "begin request");

        let mut response = Response::new(StatusCode::Ok);

        let _scope = match self.impersonate(&call) {
            Ok(scope) => scope,
            Err(err) => {
                self.fail(&call, &mut response, &err);
                trace.write(TRACE_CATEGORY, "end request");
                return response;
            }
        };

        let result = AssertUnwindSafe(self.execute(&call, &mut response))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RpcError::from_panic(panic)));

        if let Err(err) = result {
            self.fail(&call, &mut response, &err);
        }

        trace.write(TRACE_CATEGORY, "end request");
        response
    }

    fn impersonate(&self, call: &BoundCall) -> Result<Option<ImpersonationGuard>> {
        let Some(token) = call.impersonation() else {
            return Ok(None);
        };
        let Some(impersonator) = self.impersonator.as_deref() else {
            warn!(
                method = %call.method().name(),
                "impersonation token ignored; no impersonator is configured"
            );
            return Ok(None);
        };
        ImpersonationGuard::acquire(impersonator, token).map(Some)
    }

    async fn execute(&self, call: &BoundCall, response: &mut Response) -> Result<()> {
        let ctx = call.context();
        let trace = ctx.trace();
        let processor = call.processor();
        let method = call.method();

        response.no_cache();
        response.set_content_type(processor.content_type());

        let token = ctx.request().headers().get(TOKEN_HEADER);
        if !processor.is_valid_token(ctx, token) {
            return Err(RpcError::InvalidToken);
        }

        let params = processor.retrieve_parameters(ctx, method)?;

        let key = call.cache_key(&params);
        if let Some(cached) = self.cache.get(&key) {
            debug!(%key, "serving from server cache");
            trace.write(TRACE_CATEGORY, "using cached result");
            response.set_header(CACHE_HEADER, "server");
            response.write(&cached);
            return Ok(());
        }

        debug!(
            service = %method.service(),
            method = %method.name(),
            kind = ?method.kind(),
            "invoking"
        );
        if trace.is_enabled() {
            trace.write(
                TRACE_CATEGORY,
                format!("invoking {}.{}", method.service(), method.name()),
            );
        }

        let reply = match method.kind() {
            MethodKind::Static => method.bind(ctx, params)?.await?,
            MethodKind::Instance => {
                trace.write(TRACE_CATEGORY, "construct start");
                let reply = method.bind(ctx, params)?.await;
                trace.write(TRACE_CATEGORY, "construct end");
                reply?
            }
        };

        let value = match reply {
            Reply::Document(document) => {
                response.set_content_type(XML_CONTENT_TYPE);
                document.save(response.writer());
                return Ok(());
            }
            Reply::Value(value) => value.encode()?,
        };

        let text = processor.serialize(&value)?;

        if let Some(policy) = method.server_cache().first().filter(|p| p.enabled) {
            self.cache
                .insert(&key, text.clone(), CacheOptions::expires_in(policy.duration));
            debug!(%key, seconds = policy.duration.as_secs_f64(), "result cached");
            if trace.is_enabled() {
                trace.write(
                    TRACE_CATEGORY,
                    format!(
                        "adding result to cache for {} seconds",
                        policy.duration.as_secs_f64()
                    ),
                );
            }
        }

        if trace.is_enabled() {
            trace.write(TRACE_CATEGORY, format!("result: {text}"));
        }
        response.write(&text);
        Ok(())
    }

    fn fail(&self, call: &BoundCall, response: &mut Response, err: &RpcError) {
        let ctx = call.context();
        warn!(
            service = %call.service().full_name(),
            method = %call.method().name(),
            user = %ctx.user().name(),
            kind = %err.kind(),
            error = %err,
            "call failed"
        );
        if ctx.trace().is_enabled() {
            ctx.trace().write(TRACE_CATEGORY, format!("call failed: {err}"));
        }

        let processor = call.processor();
        response.clear();
        response.no_cache();
        response.set_content_type(processor.content_type());
        response.write(&processor.serialize_error(&err.payload()));
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("impersonation", &self.impersonator.is_some())
            .finish_non_exhaustive()
    }
}
