use serde_json::Value;

use super::{Processor, error_envelope, value_envelope};
use crate::context::Context;
use crate::error::{ErrorPayload, Result};
use crate::registry::MethodDescriptor;
use crate::security::TokenPolicy;

/// Reads parameters from the URL query string.
///
/// Each value is parsed as JSON when it is valid JSON (`5`, `true`,
/// `[1,2]`, `"quoted"`) and taken as a plain string otherwise.
#[derive(Debug, Clone, Default)]
pub struct QueryProcessor {
    token: TokenPolicy,
}

impl QueryProcessor {
    pub fn new(token: TokenPolicy) -> Self {
        Self { token }
    }
}

impl Processor for QueryProcessor {
    fn name(&self) -> &str {
        "query"
    }

    fn is_valid_token(&self, ctx: &Context, token: Option<&str>) -> bool {
        self.token.is_valid(ctx, token)
    }

    fn retrieve_parameters(&self, ctx: &Context, method: &MethodDescriptor) -> Result<Vec<Value>> {
        let pairs = ctx.request().query_pairs();
        Ok(method
            .params()
            .iter()
            .map(|name| {
                pairs
                    .iter()
                    .find(|(key, _)| key == name)
                    .map_or(Value::Null, |(_, raw)| {
                        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                    })
            })
            .collect())
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        value_envelope(value)
    }

    fn serialize_error(&self, error: &ErrorPayload) -> String {
        error_envelope(error)
    }
}
