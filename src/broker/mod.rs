//! The `broker` module is the broadcast half of pollcast: live, best-effort
//! delivery of published payloads to whoever is long-polling a topic, plus
//! the activity tracking and idle watchdog that let the broker exit on its own.

pub mod activity;
pub mod engine;
pub mod message;
pub mod topic;
pub mod watchdog;

pub use activity::Activity;
pub use engine::Broker;
pub use message::{Payload, SubscribeOutcome, TopicSummary};
pub use watchdog::{IdleWatchdog, WatchdogExit};
