//! Call tokens.
//!
//! A host that enables tokens hands each client the value of
//! [`TokenPolicy::issue`] (typically embedded in the page that loads the
//! client script). The client echoes it in the [`TOKEN_HEADER`] header of
//! every call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::{Context, Identity};
use crate::http::Request;

/// Request header carrying the call token.
pub const TOKEN_HEADER: &str = "X-Remoting-Token";

/// Whether and how call tokens are checked.
///
/// ```
/// use remoting::security::TokenPolicy;
///
/// let policy: TokenPolicy = serde_json::from_str(r#"{"mode":"site_key","key":"s3cret"}"#).unwrap();
/// assert_eq!(policy, TokenPolicy::SiteKey("s3cret".into()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "key", rename_all = "snake_case")]
pub enum TokenPolicy {
    /// Every call is accepted, with or without a token.
    #[default]
    Disabled,
    /// The token must match the one issued for this key, user agent and user.
    SiteKey(String),
}

impl TokenPolicy {
    pub fn is_valid(&self, ctx: &Context, token: Option<&str>) -> bool {
        match self {
            Self::Disabled => true,
            Self::SiteKey(key) => token.is_some_and(|token| {
                constant_time_eq(
                    token.as_bytes(),
                    issue_token(key, ctx.request(), ctx.user()).as_bytes(),
                )
            }),
        }
    }

    /// The token a client must send for requests like the one in `ctx`.
    /// `None` when tokens are disabled.
    pub fn issue(&self, ctx: &Context) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::SiteKey(key) => Some(issue_token(key, ctx.request(), ctx.user())),
        }
    }
}

/// Lowercase hex SHA-256 over the site key, the `User-Agent` header and the
/// user name.
pub fn issue_token(site_key: &str, request: &Request, user: &Identity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site_key.as_bytes());
    hasher.update([0_u8]);
    hasher.update(request.headers().get("user-agent").unwrap_or("").as_bytes());
    hasher.update([0_u8]);
    hasher.update(user.name().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
