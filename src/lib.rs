//! # Pollcast
//!
//! `pollcast` is a small long-poll event delivery server built on tokio.
//! Producers hand JSON messages to consumers that are blocked in an HTTP
//! request, in one of two flavours:
//!
//! - `broker`: live broadcast. A publish reaches whoever is subscribed to the
//!   topic right now; nothing is kept for later.
//! - `session`: queued delivery. Events accumulate per session until a
//!   waiting consumer drains them; nothing is dropped.
//!
//! ## Core Modules
//!
//! - `broker`: topics, the broadcast registry, activity tracking and the idle watchdog.
//! - `session`: per-session backlogs and the wait endpoint.
//! - `config`: loading server, broker and queue settings.
//! - `transport`: the HTTP server and its wire types.
//! - `utils`: the error type and logging setup.

pub mod broker;
pub mod config;
pub mod session;
pub mod transport;
pub mod utils;
