//! Session manager
//!
//! Owns one [`SessionQueue`] per session id and implements the wait
//! endpoint: drain, else register and block, else time out.
//!
//! The register/signal race is closed from both sides. `wait` drains before
//! registering, so an event that is already there is never missed, and it
//! drains again after waking, so a signal whose event was taken by another
//! consumer yields `NoContent` instead of stale data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::Activity;
use crate::session::queue::{SessionQueue, WaiterId};
use crate::utils::{Error, Result};

/// Callback run synchronously inside `drain` whenever a non-empty batch is taken.
pub type DrainHook = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// How a `wait` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Events(Vec<Value>),
    NoContent,
    Cancelled,
}

pub struct SessionManager {
    queues: Mutex<HashMap<String, Arc<SessionQueue>>>,
    activity: Arc<Activity>,
    on_drain: Option<DrainHook>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .field("on_drain", &self.on_drain.is_some())
            .finish()
    }
}

struct WaiterGuard<'a> {
    queue: &'a SessionQueue,
    id: WaiterId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.queue.unregister_waiter(&self.id);
    }
}

impl SessionManager {
    pub fn new(activity: Arc<Activity>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            activity,
            on_drain: None,
        }
    }

    pub fn with_drain_hook(mut self, hook: DrainHook) -> Self {
        self.on_drain = Some(hook);
        self
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a session queue, creating it on first reference.
    ///
    /// The queue is touched under the registry lock so a concurrent
    /// [`SessionManager::evict_idle`] cannot remove it from under the caller.
    pub fn queue(&self, session: &str) -> Arc<SessionQueue> {
        let mut queues = self.queues();
        let queue = queues
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(SessionQueue::new(session)));
        queue.touch();
        Arc::clone(queue)
    }

    pub fn session_count(&self) -> usize {
        self.queues().len()
    }

    /// Queue an event for `session`. Returns the backlog length after the push.
    pub fn push(&self, session: &str, event: Value) -> Result<usize> {
        if session.is_empty() {
            return Err(Error::MissingSession);
        }
        self.activity.touch();
        let pending = self.queue(session).push(event);
        debug!(session, pending, "event queued");
        Ok(pending)
    }

    /// Atomically take every queued event for `session`.
    pub fn drain(&self, session: &str) -> Result<Vec<Value>> {
        if session.is_empty() {
            return Err(Error::MissingSession);
        }
        Ok(self.drain_queue(&self.queue(session)))
    }

    fn drain_queue(&self, queue: &SessionQueue) -> Vec<Value> {
        let events = queue.drain();
        if !events.is_empty() {
            if let Some(hook) = &self.on_drain {
                hook(&queue.session, &events);
            }
        }
        events
    }

    fn outcome(&self, queue: &SessionQueue) -> WaitOutcome {
        let events = self.drain_queue(queue);
        if events.is_empty() {
            WaitOutcome::NoContent
        } else {
            WaitOutcome::Events(events)
        }
    }

    /// Return queued events for `session`, blocking up to `timeout` for one to arrive.
    pub async fn wait(
        &self,
        session: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        if session.is_empty() {
            return Err(Error::MissingSession);
        }
        let _call = self.activity.enter();
        let queue = self.queue(session);

        let events = self.drain_queue(&queue);
        if !events.is_empty() {
            return Ok(WaitOutcome::Events(events));
        }

        let (id, mut signal) = queue.register_waiter();
        let _guard = WaiterGuard {
            queue: &queue,
            id,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = signal.recv() => self.outcome(&queue),
            _ = tokio::time::sleep(timeout) => self.outcome(&queue),
        };
        Ok(outcome)
    }

    /// Drop session queues that nobody has used for `ttl` and nobody is waiting on.
    ///
    /// Returns the number of sessions removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut queues = self.queues();
        let before = queues.len();
        queues.retain(|session, queue| {
            if !queue.is_idle_for(ttl) {
                return true;
            }
            let dropped = queue.pending();
            if dropped > 0 {
                warn!(session = %session, dropped, "evicting idle session with undrained events");
            } else {
                debug!(session = %session, "evicting idle session");
            }
            false
        });
        before - queues.len()
    }
}
