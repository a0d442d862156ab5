//! Host settings for the router.
//!
//! Settings deserialize from JSON with every field optional:
//!
//! ```
//! use remoting::config::Settings;
//! use remoting::security::TokenPolicy;
//!
//! let settings = Settings::from_json(r#"{
//!     "route_prefix": "/api",
//!     "token": {"mode": "site_key", "key": "s3cret"}
//! }"#).unwrap();
//!
//! assert_eq!(settings.route_prefix, "/api");
//! assert_eq!(settings.token, TokenPolicy::SiteKey("s3cret".into()));
//! assert!(!settings.trace);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::TokenPolicy;

pub const DEFAULT_ROUTE_PREFIX: &str = "/rpc";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("route prefix must start with '/': {0:?}")]
    RoutePrefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Path under which services are addressed, e.g. `/rpc/Demo.Calculator/Add`.
    pub route_prefix: String,
    /// Call-token checking applied by both processors.
    pub token: TokenPolicy,
    /// Enables the per-request trace for every call.
    pub trace: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            route_prefix: DEFAULT_ROUTE_PREFIX.to_owned(),
            token: TokenPolicy::Disabled,
            trace: false,
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    #[must_use]
    pub fn route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn token(mut self, policy: TokenPolicy) -> Self {
        self.token = policy;
        self
    }

    #[must_use]
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.route_prefix.starts_with('/') {
            Ok(())
        } else {
            Err(ConfigError::RoutePrefix(self.route_prefix.clone()))
        }
    }

    /// The prefix without trailing slashes; `/` becomes empty.
    pub(crate) fn normalized_prefix(&self) -> &str {
        self.route_prefix.trim_end_matches('/')
    }
}
