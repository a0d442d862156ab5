use serde_json::{Map, Value};

use super::{Processor, error_envelope, value_envelope};
use crate::context::Context;
use crate::error::{ErrorPayload, Result, RpcError};
use crate::registry::MethodDescriptor;
use crate::security::TokenPolicy;

/// Reads parameters from a JSON object in the request body, keyed by
/// parameter name. Missing names bind as `null`; extra keys are ignored.
#[derive(Debug, Clone, Default)]
pub struct JsonProcessor {
    token: TokenPolicy,
}

impl JsonProcessor {
    pub fn new(token: TokenPolicy) -> Self {
        Self { token }
    }
}

impl Processor for JsonProcessor {
    fn name(&self) -> &str {
        "json"
    }

    fn is_valid_token(&self, ctx: &Context, token: Option<&str>) -> bool {
        self.token.is_valid(ctx, token)
    }

    fn retrieve_parameters(&self, ctx: &Context, method: &MethodDescriptor) -> Result<Vec<Value>> {
        let body = ctx.request().body_bytes();
        let mut object = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(object)) => object,
                Ok(other) => {
                    return Err(RpcError::Parameters(format!(
                        "expected a JSON object, got {}",
                        kind_of(&other)
                    )));
                }
                Err(e) => return Err(RpcError::Parameters(e.to_string())),
            }
        };

        Ok(method
            .params()
            .iter()
            .map(|name| object.remove(name).unwrap_or(Value::Null))
            .collect())
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        value_envelope(value)
    }

    fn serialize_error(&self, error: &ErrorPayload) -> String {
        error_envelope(error)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
