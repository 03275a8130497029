use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// A published JSON body, shared between every slot it is written to.
pub type Payload = Arc<Value>;

/// How a `subscribe` call ended.
///
/// Only `Delivered` carries data. A timeout is an expected terminal state of
/// a long-poll, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeOutcome {
    Delivered(Payload),
    TimedOut,
    Cancelled,
}

/// Snapshot of one topic for the informational page.
#[derive(Debug, Clone, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub listeners: usize,
    pub favicon: Option<String>,
    pub created_at: String,
}
