//! Processors: how parameters are read from a request and how results and
//! errors are written back.
//!
//! A [`BoundCall`] ties one processor to one resolved method and one
//! request; it is what [`Dispatcher::run`](crate::dispatch::Dispatcher::run)
//! consumes.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::context::Context;
use crate::error::{ErrorPayload, Result};
use crate::registry::{MethodDescriptor, ServiceDescriptor};
use crate::security::ImpersonationToken;

mod json;
mod query;

pub use json::JsonProcessor;
pub use query::QueryProcessor;

/// Content type used by the bundled processors.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Reads parameters for, and writes results of, one kind of request.
pub trait Processor: Send + Sync {
    /// Short name; part of every cache key.
    fn name(&self) -> &str;

    fn content_type(&self) -> &str {
        DEFAULT_CONTENT_TYPE
    }

    fn is_valid_token(&self, ctx: &Context, token: Option<&str>) -> bool;

    /// Parameter values for `method`, in declaration order.
    fn retrieve_parameters(&self, ctx: &Context, method: &MethodDescriptor) -> Result<Vec<Value>>;

    /// Hash identifying a call to `method` with `params`. Equal calls must
    /// hash equally within one process.
    fn call_hash(&self, method: &MethodDescriptor, params: &[Value]) -> u64 {
        let mut hasher = DefaultHasher::new();
        method.service().hash(&mut hasher);
        method.name().hash(&mut hasher);
        for param in params {
            param.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn serialize(&self, value: &Value) -> Result<String>;

    /// Never fails; the error path has nowhere else to go.
    fn serialize_error(&self, error: &ErrorPayload) -> String;
}

#[derive(Serialize)]
struct ValueEnvelope<'a> {
    value: &'a Value,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a ErrorPayload,
}

/// `{"value": ...}`
pub(crate) fn value_envelope(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&ValueEnvelope { value })?)
}

/// `{"error": {...}}`
pub(crate) fn error_envelope(error: &ErrorPayload) -> String {
    serde_json::to_string(&ErrorEnvelope { error }).unwrap_or_else(|_| {
        r#"{"error":{"type":"Error","message":"unserializable error","kind":"unclassified"}}"#
            .to_owned()
    })
}

/// One call, bound to its processor, target and request.
pub struct BoundCall {
    processor: Arc<dyn Processor>,
    service: Arc<ServiceDescriptor>,
    method: Arc<MethodDescriptor>,
    context: Context,
    impersonation: Option<ImpersonationToken>,
}

impl BoundCall {
    pub fn new(
        processor: Arc<dyn Processor>,
        service: Arc<ServiceDescriptor>,
        method: Arc<MethodDescriptor>,
        context: Context,
    ) -> Self {
        Self {
            processor,
            service,
            method,
            context,
            impersonation: None,
        }
    }

    /// Runs the call under the identity behind `token`.
    #[must_use]
    pub fn with_impersonation(mut self, token: ImpersonationToken) -> Self {
        self.impersonation = Some(token);
        self
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn impersonation(&self) -> Option<&ImpersonationToken> {
        self.impersonation.as_ref()
    }

    /// `service|processor|method|hash`
    pub fn cache_key(&self, params: &[Value]) -> String {
        format!(
            "{}|{}|{}|{}",
            self.service.full_name(),
            self.processor.name(),
            self.method.name(),
            self.processor.call_hash(&self.method, params)
        )
    }
}
