//! Per-request context: the request, who sent it, a trace sink, and
//! host-supplied extensions.
//!
//! Instances of services that opt into
//! [`ContextInitializer`](crate::registry::ContextInitializer) receive a
//! reference to this before their method runs.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::http::Request;

/// Type-erased map of host state keyed by type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// The user the host authenticated for this request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    name: String,
    authenticated: bool,
}

impl Identity {
    /// An authenticated user.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authenticated: true,
        }
    }

    /// Nobody; the name is empty.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

/// One line written to a [`Trace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub category: String,
    pub message: String,
}

/// Per-request diagnostic log the host can render next to the response.
///
/// Writes are dropped while the trace is disabled. Every accepted write is
/// also emitted as a `tracing` event at `TRACE` level.
#[derive(Debug, Default)]
pub struct Trace {
    enabled: AtomicBool,
    entries: Mutex<Vec<TraceEntry>>,
}

impl Trace {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turns the trace on; earlier writes stay dropped.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn write(&self, category: &str, message: impl Into<String>) {
        if !self.is_enabled() {
            return;
        }
        let message = message.into();
        tracing::trace!(category, %message, "request trace");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TraceEntry {
                category: category.to_owned(),
                message,
            });
    }

    /// Returns a copy of everything written so far.
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Everything the host knows about the request being served.
#[derive(Debug)]
pub struct Context {
    request: Request,
    user: Identity,
    trace: Arc<Trace>,
    extensions: Extensions,
}

impl Context {
    /// Creates a context for an anonymous user with tracing off.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            user: Identity::anonymous(),
            trace: Arc::new(Trace::default()),
            extensions: Extensions::new(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: Identity) -> Self {
        self.user = user;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = Arc::new(Trace::new(enabled));
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn user(&self) -> &Identity {
        &self.user
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// A handle that outlives the context, for reading the trace once the
    /// call has consumed it.
    pub fn trace_handle(&self) -> Arc<Trace> {
        Arc::clone(&self.trace)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
