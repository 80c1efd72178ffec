//! Optimistic local mutation.
//!
//! Models the client edit lifecycle: the local value changes immediately, the
//! commit is debounced, and a failed commit reverts to the last known-good
//! fetched state instead of leaving a half-applied edit visible.

use std::future::Future;
use tokio::time::{Duration, Instant};

/// A locally edited value backed by an authoritative remote copy.
#[derive(Debug)]
pub struct OptimisticValue<T: Clone> {
    /// Last state confirmed by the server (fetched or successfully committed).
    committed: T,
    /// Tentative local state shown to the user.
    current: T,
    dirty: bool,
    debounce: Duration,
    due_at: Option<Instant>,
}

impl<T: Clone> OptimisticValue<T> {
    pub fn new(initial: T, debounce: Duration) -> Self {
        Self {
            committed: initial.clone(),
            current: initial,
            dirty: false,
            debounce,
            due_at: None,
        }
    }

    /// The value to display: tentative when an edit is in flight.
    pub fn get(&self) -> &T {
        &self.current
    }

    /// Whether an uncommitted local edit exists.
    pub fn pending(&self) -> bool {
        self.dirty
    }

    /// Record a tentative local edit; re-arms the debounce window.
    pub fn set(&mut self, value: T) {
        self.current = value;
        self.dirty = true;
        self.due_at = Some(Instant::now() + self.debounce);
    }

    /// Authoritative state arrived from a fetch. Overwrites the known-good
    /// copy; the visible value follows unless a local edit is still pending.
    pub fn refreshed(&mut self, value: T) {
        self.committed = value.clone();
        if !self.dirty {
            self.current = value;
        }
    }

    /// Whether the debounce window has elapsed for a pending edit.
    pub fn due(&self) -> bool {
        match self.due_at {
            Some(deadline) => self.dirty && Instant::now() >= deadline,
            None => false,
        }
    }

    /// Commit the pending edit once due, waiting out the rest of the debounce
    /// window first. On failure the visible value reverts to the last
    /// known-good state and the error is returned to the caller.
    pub async fn commit<F, Fut, E>(&mut self, update: F) -> Result<bool, E>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(deadline) = self.due_at {
            tokio::time::sleep_until(deadline).await;
        }
        match update(self.current.clone()).await {
            Ok(()) => {
                self.committed = self.current.clone();
                self.dirty = false;
                self.due_at = None;
                Ok(true)
            }
            Err(e) => {
                self.current = self.committed.clone();
                self.dirty = false;
                self.due_at = None;
                Err(e)
            }
        }
    }
}
