//! Per-session event backlog
//!
//! Unlike a broadcast topic, a session queue never drops an event: pushes
//! accumulate until a consumer drains them. Waiters register a
//! single-capacity signal slot that only says "look again"; the data itself
//! is always taken from the backlog.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

pub type WaiterId = String;

#[derive(Debug)]
struct Waiter {
    id: WaiterId,
    signal: mpsc::Sender<()>,
}

#[derive(Debug)]
struct QueueState {
    backlog: Vec<Value>,
    waiters: Vec<Waiter>,
    last_used: Instant,
}

#[derive(Debug)]
pub struct SessionQueue {
    pub session: String,
    state: Mutex<QueueState>,
}

impl SessionQueue {
    pub fn new(session: &str) -> Self {
        Self {
            session: session.to_string(),
            state: Mutex::new(QueueState {
                backlog: Vec::new(),
                waiters: Vec::new(),
                last_used: Instant::now(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and wake every registered waiter.
    ///
    /// Waiters are signalled at most once per registration: the list is
    /// cleared after the signal pass. Returns the backlog length after the push.
    pub fn push(&self, event: Value) -> usize {
        let mut state = self.state();
        state.backlog.push(event);
        state.last_used = Instant::now();
        for waiter in state.waiters.drain(..) {
            // a full slot has already been woken
            let _ = waiter.signal.try_send(());
        }
        state.backlog.len()
    }

    /// Swap the backlog for an empty one and return what was there, in push order.
    pub fn drain(&self) -> Vec<Value> {
        let mut state = self.state();
        state.last_used = Instant::now();
        std::mem::take(&mut state.backlog)
    }

    pub fn register_waiter(&self) -> (WaiterId, mpsc::Receiver<()>) {
        let (signal, receiver) = mpsc::channel(1);
        let id = format!("waiter-{}", Uuid::new_v4());
        let mut state = self.state();
        state.waiters.push(Waiter {
            id: id.clone(),
            signal,
        });
        state.last_used = Instant::now();
        (id, receiver)
    }

    /// Idempotent: a waiter consumed by a push is already gone.
    pub fn unregister_waiter(&self, id: &str) {
        self.state().waiters.retain(|w| w.id != id);
    }

    pub fn touch(&self) {
        self.state().last_used = Instant::now();
    }

    pub fn pending(&self) -> usize {
        self.state().backlog.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.state().waiters.len()
    }

    /// `true` when nobody is waiting and the queue has not been used for `ttl`.
    pub fn is_idle_for(&self, ttl: Duration) -> bool {
        let state = self.state();
        state.waiters.is_empty() && state.last_used.elapsed() >= ttl
    }
}
