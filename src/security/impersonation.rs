//! Running a call under another identity.
//!
//! An [`Impersonator`] turns an opaque [`ImpersonationToken`] into an active
//! [`ImpersonationContext`]. The dispatcher holds it inside an
//! [`ImpersonationGuard`], which undoes it when dropped: on normal return,
//! on every early return, on a panic in the target method, and when the
//! dispatch future is dropped half way.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::Identity;
use crate::error::{Result, RpcError};

/// Opaque handle naming the identity a call should run as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImpersonationToken(String);

impl ImpersonationToken {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An identity switch that is currently in effect.
pub trait ImpersonationContext: Send {
    /// Reverts to the identity in effect before the switch.
    fn undo(&mut self);
}

/// Source of impersonation contexts.
pub trait Impersonator: Send + Sync {
    fn impersonate(&self, token: &ImpersonationToken) -> Result<Box<dyn ImpersonationContext>>;
}

/// Keeps an impersonation active for as long as it lives.
#[must_use = "the impersonation ends as soon as the guard is dropped"]
pub struct ImpersonationGuard {
    context: Option<Box<dyn ImpersonationContext>>,
}

impl ImpersonationGuard {
    pub fn acquire(impersonator: &dyn Impersonator, token: &ImpersonationToken) -> Result<Self> {
        let context = impersonator.impersonate(token)?;
        Ok(Self {
            context: Some(context),
        })
    }

    /// Ends the impersonation now instead of at drop.
    pub fn release(mut self) {
        self.undo();
    }

    fn undo(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.undo();
            tracing::debug!("impersonation released");
        }
    }
}

impl Drop for ImpersonationGuard {
    fn drop(&mut self) {
        self.undo();
    }
}

impl fmt::Debug for ImpersonationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpersonationGuard")
            .field("active", &self.context.is_some())
            .finish()
    }
}

/// An [`Impersonator`] over a fixed token table.
///
/// Active identities form a stack shared by every scope it hands out;
/// [`current`](Self::current) is the innermost one.
#[derive(Debug, Default, Clone)]
pub struct IdentityImpersonator {
    identities: Arc<HashMap<ImpersonationToken, Identity>>,
    active: Arc<Mutex<Vec<Identity>>>,
}

impl IdentityImpersonator {
    pub fn new<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = (ImpersonationToken, Identity)>,
    {
        Self {
            identities: Arc::new(identities.into_iter().collect()),
            active: Arc::default(),
        }
    }

    /// The identity of the innermost active scope.
    pub fn current(&self) -> Option<Identity> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Number of scopes not yet undone.
    pub fn active_scopes(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct StackScope {
    identity: Identity,
    active: Arc<Mutex<Vec<Identity>>>,
}

impl ImpersonationContext for StackScope {
    fn undo(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = active.iter().rposition(|id| *id == self.identity) {
            active.remove(pos);
        }
    }
}

impl Impersonator for IdentityImpersonator {
    fn impersonate(&self, token: &ImpersonationToken) -> Result<Box<dyn ImpersonationContext>> {
        let identity = self
            .identities
            .get(token)
            .cloned()
            .ok_or_else(|| RpcError::Impersonation(format!("unknown token {:?}", token.as_str())))?;
        tracing::debug!(user = %identity.name(), "impersonating");
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(identity.clone());
        Ok(Box::new(StackScope {
            identity,
            active: Arc::clone(&self.active),
        }))
    }
}
