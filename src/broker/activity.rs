//! Process-wide activity tracking read by the idle watchdog.
//!
//! Every publish, subscribe and wait call holds an [`ActiveCall`] for its
//! whole duration. Entering and leaving both advance the last-active
//! timestamp, so a long-poll that is still blocked keeps the broker alive
//! through the connection count and a finished one restarts the countdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Activity {
    last_active: Mutex<Instant>,
    connections: AtomicUsize,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last_active: Mutex::new(Instant::now()),
            connections: AtomicUsize::new(0),
        }
    }

    /// Advance the last-active timestamp to now.
    pub fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Mark the start of a call. The count drops again when the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> ActiveCall {
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ActiveCall {
            activity: Arc::clone(self),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

/// Guard counting one in-flight call.
#[derive(Debug)]
pub struct ActiveCall {
    activity: Arc<Activity>,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.activity.connections.fetch_sub(1, Ordering::SeqCst);
        self.activity.touch();
    }
}
