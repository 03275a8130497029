use serde::{Deserialize, Serialize};

/// Body of a successful `POST /publish/{topic}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResponse {
    pub delivered: usize,
}

/// Body of a successful `POST /events[/{session}]`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushResponse {
    pub pending: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
