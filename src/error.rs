//! Failures that can end a remote call, and the payload clients receive
//! for them.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Boxed error returned by a target method.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Everything that can go wrong while serving one call.
///
/// None of these escape to the host: the dispatcher turns each one into an
/// [`ErrorPayload`] and writes it as the response body.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("The call token is not valid.")]
    InvalidToken,

    #[error("could not read parameters: {0}")]
    Parameters(String),

    #[error("parameters do not match {method}: {source}")]
    Arguments {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{service} has no parameterless constructor")]
    NoConstructor { service: String },

    /// The target method ran and returned an error. `source` is what the
    /// client gets to see.
    #[error("{method} failed: {source}")]
    Invocation {
        method: String,
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("could not serialize the result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("impersonation failed: {0}")]
    Impersonation(String),

    #[error("{0}")]
    Unclassified(String),
}

/// Coarse classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authorization,
    ParameterBinding,
    Invocation,
    Serialization,
    Unclassified,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::ParameterBinding => "parameter_binding",
            Self::Invocation => "invocation",
            Self::Serialization => "serialization",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client receives in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    pub kind: FailureKind,
}

impl RpcError {
    /// Wraps an error returned by the target method `method`.
    pub fn invocation<E>(method: impl Into<String>, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Invocation {
            method: method.into(),
            type_name: std::any::type_name::<E>(),
            source: Box::new(error),
        }
    }

    /// Converts a caught panic into an unclassified failure.
    pub fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "the call panicked".to_owned()
        };
        Self::Unclassified(message)
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidToken => FailureKind::Authorization,
            Self::Parameters(_) | Self::Arguments { .. } => FailureKind::ParameterBinding,
            Self::NoConstructor { .. } | Self::Invocation { .. } => FailureKind::Invocation,
            Self::Serialization(_) => FailureKind::Serialization,
            Self::Impersonation(_) | Self::Unclassified(_) => FailureKind::Unclassified,
        }
    }

    /// The error the target method itself produced, when this one wraps it.
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Invocation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Builds the client-facing payload, surfacing the inner error when
    /// there is one.
    pub fn payload(&self) -> ErrorPayload {
        let (type_name, message) = match self {
            Self::Invocation {
                type_name, source, ..
            } => (short_type_name(type_name).to_owned(), source.to_string()),
            other => (other.type_name().to_owned(), other.to_string()),
        };
        ErrorPayload {
            type_name,
            message,
            kind: self.kind(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::InvalidToken => "SecurityError",
            Self::Parameters(_) | Self::Arguments { .. } => "ArgumentError",
            Self::NoConstructor { .. } => "MissingConstructorError",
            Self::Invocation { .. } => "InvocationError",
            Self::Serialization(_) => "SerializationError",
            Self::Impersonation(_) => "ImpersonationError",
            Self::Unclassified(_) => "Error",
        }
    }
}

/// `alloc::string::String` -> `String`, `my::Error<a::B>` -> `Error<a::B>`.
fn short_type_name(full: &str) -> &str {
    let head = full.find('<').map_or(full, |generic| &full[..generic]);
    match head.rfind("::") {
        Some(sep) => &full[sep + 2..],
        None => full,
    }
}
