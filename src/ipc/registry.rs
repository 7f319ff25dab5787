//! Registry of live sessions.
//!
//! Tracks every session an endpoint has started so it can be counted and
//! stopped together. Sessions register when they start and deregister
//! themselves exactly once when they finish; deregistering a session that
//! `stop_all` already removed is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A live session the registry can stop.
pub trait Session: Send + Sync + 'static {
    /// Stable handle keying the session in the registry.
    fn id(&self) -> u64;

    /// Ask the session to abandon its in-flight work and close.
    fn stop(&self);
}

/// Thread-safe set of live sessions.
pub struct HandlerRegistry<S: Session> {
    sessions: Mutex<HashMap<u64, Arc<S>>>,
}

impl<S: Session> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<S>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, session: Arc<S>) {
        self.lock().insert(session.id(), session);
    }

    /// Remove a session. Returns false if it was already gone.
    pub fn deregister(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Guard that deregisters `id` when dropped, including during unwinding.
    pub fn deregistration(&self, id: u64) -> Deregistration<'_, S> {
        Deregistration { registry: self, id }
    }

    /// Stop every live session and clear the set.
    pub fn stop_all(&self) {
        let drained: Vec<Arc<S>> = self.lock().drain().map(|(_, session)| session).collect();
        for session in drained {
            session.stop();
        }
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl<S: Session> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes one session from its registry on drop.
#[must_use = "the session is deregistered as soon as the guard is dropped"]
pub struct Deregistration<'a, S: Session> {
    registry: &'a HandlerRegistry<S>,
    id: u64,
}

impl<S: Session> Drop for Deregistration<'_, S> {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
