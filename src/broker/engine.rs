//! Broker engine
//!
//! The broadcast registry: a lazily populated map from topic name to
//! [`Topic`], plus the activity state shared with the idle watchdog.
//!
//! Delivery is best-effort and live-only. A payload reaches the consumers
//! blocked in `subscribe` at the moment of publishing; when nobody is
//! listening the publisher sleeps for a short grace period and makes exactly
//! one more delivery pass, then the payload is gone.
//!
//! Concurrency notes:
//! - The registry lock only guards map lookups and inserts. Each topic has
//!   its own lock for its slot list, so unrelated topics never contend.
//! - No lock is held across an `.await`; the retry sleep and the long-poll
//!   wait both run with every lock released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::activity::Activity;
use crate::broker::message::{Payload, SubscribeOutcome, TopicSummary};
use crate::broker::topic::{SubscriberId, Topic};
use crate::config::BrokerSettings;
use crate::utils::{Error, Result};

#[derive(Debug)]
pub struct Broker {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    activity: Arc<Activity>,
    settings: BrokerSettings,
}

/// Removes a subscriber slot from its topic when the subscribe call exits,
/// including when the call's future is dropped mid-wait.
struct SlotGuard<'a> {
    topic: &'a Topic,
    id: SubscriberId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.topic.unregister(&self.id);
    }
}

impl Broker {
    pub fn new(settings: BrokerSettings, activity: Arc<Activity>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            activity,
            settings,
        }
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Arc<Topic>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a topic, creating it on first reference.
    pub fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics();
        Arc::clone(
            topics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Topic::new(name))),
        )
    }

    /// Validate a raw publish body without touching any state.
    pub fn parse_payload(&self, body: &[u8]) -> Result<Payload> {
        let limit = self.settings.max_payload_bytes;
        if body.len() > limit {
            return Err(Error::PayloadTooLarge {
                size: body.len(),
                limit,
            });
        }
        let value: Value = serde_json::from_slice(body)?;
        Ok(Arc::new(value))
    }

    /// Publish a raw JSON body to every subscriber currently waiting on `topic`.
    ///
    /// Returns the number of subscribers the payload was handed to. Input is
    /// rejected before any delivery is attempted.
    pub async fn publish(&self, topic: &str, body: &[u8]) -> Result<usize> {
        if topic.is_empty() {
            return Err(Error::MissingTopic);
        }
        let payload = self.parse_payload(body)?;
        let _call = self.activity.enter();

        let topic = self.topic(topic);
        let delivered = topic.deliver(&payload);
        if delivered > 0 {
            debug!(topic = %topic.name, delivered, "published");
            return Ok(delivered);
        }

        // A consumer may be between two long-polls; give it one chance to re-register.
        tokio::time::sleep(self.settings.publish_retry_delay()).await;
        let delivered = topic.deliver(&payload);
        debug!(topic = %topic.name, delivered, "published after retry");
        Ok(delivered)
    }

    /// Block until a payload is published on `topic`, the subscribe timeout
    /// elapses, or `cancel` fires.
    ///
    /// `favicon`, when supplied, replaces the topic's display metadata.
    pub async fn subscribe(
        &self,
        topic: &str,
        favicon: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<SubscribeOutcome> {
        if topic.is_empty() {
            return Err(Error::MissingTopic);
        }
        let _call = self.activity.enter();

        let topic = self.topic(topic);
        if let Some(favicon) = favicon.filter(|f| !f.is_empty()) {
            topic.set_favicon(favicon);
        }

        let (id, mut slot) = topic.register();
        let _guard = SlotGuard {
            topic: &topic,
            id: id.clone(),
        };
        debug!(topic = %topic.name, subscriber = %id, "subscriber waiting");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => SubscribeOutcome::Cancelled,
            received = slot.recv() => match received {
                Some(payload) => SubscribeOutcome::Delivered(payload),
                None => SubscribeOutcome::Cancelled,
            },
            _ = tokio::time::sleep(self.settings.subscribe_timeout()) => SubscribeOutcome::TimedOut,
        };
        Ok(outcome)
    }

    /// Current listener count of a topic without creating it.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|t| t.listener_count())
            .unwrap_or(0)
    }

    /// Snapshot of every known topic, sorted by name.
    pub fn topic_summaries(&self) -> Vec<TopicSummary> {
        let topics: Vec<Arc<Topic>> = self.topics().values().cloned().collect();
        let mut summaries: Vec<TopicSummary> = topics
            .iter()
            .map(|t| TopicSummary {
                name: t.name.clone(),
                listeners: t.listener_count(),
                favicon: t.favicon(),
                created_at: t.created_at.to_rfc3339(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}
