//! # Listener Registry
//!
//! Maps a message type to the ordered list of callbacks subscribed to it.
//! Registration order is dispatch order, and registering the same callback
//! twice yields two independent invocations.
//!
//! Callbacks are compared by identity (`Arc::ptr_eq`), so `off` needs the
//! same [`Listener`] handle that was passed to `on`.
//!
//! A failing callback, whether it returns `Err` or panics, is logged and
//! skipped; the rest of the list still runs.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::model::Envelope;

/// Error type a listener may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback. Clone the `Arc` to keep a handle for `off`.
pub type Listener = Arc<dyn Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync>;

/// Wraps a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of one [`ListenerRegistry::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that ran to completion.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `listener` to the list for `kind`, creating the list if absent.
    pub fn on(&self, kind: &str, listener: Listener) {
        self.lock().entry(kind.to_string()).or_default().push(listener);
    }

    /// Removes listeners for `kind`.
    ///
    /// With `Some(listener)`, removes only the first registration of that
    /// listener; the type's list is dropped once it is empty. With `None`,
    /// removes every listener for the type. Returns whether anything was removed.
    pub fn off(&self, kind: &str, listener: Option<&Listener>) -> bool {
        let mut listeners = self.lock();
        let Some(target) = listener else {
            return listeners.remove(kind).is_some();
        };

        let Some(list) = listeners.get_mut(kind) else {
            return false;
        };
        let removed = match list.iter().position(|l| Arc::ptr_eq(l, target)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        };
        if list.is_empty() {
            listeners.remove(kind);
        }
        removed
    }

    /// Invokes every listener registered for `kind`, in registration order.
    ///
    /// The list is snapshotted before the first call, so listeners may call
    /// `on`/`off` on this registry without deadlocking; such changes apply to
    /// the next dispatch.
    pub fn dispatch(&self, kind: &str, envelope: &Envelope) -> DispatchReport {
        let snapshot: Vec<Listener> = match self.lock().get(kind) {
            Some(list) => list.clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for (index, listener) in snapshot.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    log::error!("Listener #{} for '{}' failed: {}", index, kind, e);
                    report.failed += 1;
                }
                Err(_) => {
                    log::error!("Listener #{} for '{}' panicked", index, kind);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Number of registrations currently held for `kind`.
    pub fn listener_count(&self, kind: &str) -> usize {
        self.lock().get(kind).map_or(0, Vec::len)
    }

    /// Message types that currently have at least one listener.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.lock().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
