//! Who may call, and as whom the call runs.
//!
//! - [`token`]: call tokens validated before any method is bound.
//! - [`impersonation`]: scoped identity switching around a dispatch.

pub mod impersonation;
pub mod token;

pub use impersonation::{
    IdentityImpersonator, ImpersonationContext, ImpersonationGuard, ImpersonationToken,
    Impersonator,
};
pub use token::{TOKEN_HEADER, TokenPolicy, issue_token};
