//! The `session` module is the queued half of pollcast: lossless per-session
//! backlogs that a consumer drains with a single long-poll.

pub mod manager;
pub mod queue;

pub use manager::{DrainHook, SessionManager, WaitOutcome};
pub use queue::SessionQueue;
