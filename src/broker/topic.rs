//! Topic management
//!
//! A `Topic` holds the hand-off slots of the consumers currently blocked in a
//! subscribe call on that topic. Each slot is a single-capacity channel owned
//! by exactly one subscribe call; a publisher writes to it at most once and
//! never waits on it.
//!
//! Concurrency note: the slot list has its own lock, separate from the
//! registry map, and it is never held across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::broker::message::Payload;

pub type SubscriberId = String;

#[derive(Debug)]
struct Slot {
    id: SubscriberId,
    sender: mpsc::Sender<Payload>,
}

#[derive(Debug, Default)]
struct TopicState {
    slots: Vec<Slot>,
    favicon: Option<String>,
}

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub created_at: DateTime<Utc>,
    state: Mutex<TopicState>,
}

impl Topic {
    /// Create a new topic with the given name and no subscribers.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            state: Mutex::new(TopicState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh single-capacity slot. The caller owns the receiver
    /// and must hand the id back to [`Topic::unregister`] when it stops waiting.
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(1);
        let id = format!("sub-{}", Uuid::new_v4());
        self.state().slots.push(Slot {
            id: id.clone(),
            sender,
        });
        (id, receiver)
    }

    /// Remove a slot. Unknown ids are ignored.
    pub fn unregister(&self, id: &str) {
        self.state().slots.retain(|slot| slot.id != id);
    }

    /// One non-blocking delivery pass over the registered slots.
    ///
    /// Returns the number of slots written. Full slots (already holding an
    /// earlier payload) are skipped and not counted.
    pub fn deliver(&self, payload: &Payload) -> usize {
        let state = self.state();
        let mut delivered = 0;
        for slot in &state.slots {
            match slot.sender.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(topic = %self.name, slot = %slot.id, "slot already full, skipping");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(topic = %self.name, slot = %slot.id, "slot closed, skipping");
                }
            }
        }
        delivered
    }

    /// Record display metadata. Last writer wins.
    pub fn set_favicon(&self, favicon: String) {
        self.state().favicon = Some(favicon);
    }

    pub fn favicon(&self) -> Option<String> {
        self.state().favicon.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state().slots.len()
    }
}
