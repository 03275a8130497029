//! The `transport` module exposes the broker and the session queues over
//! plain HTTP/1.1 long-polling.
//!
//! It defines the JSON bodies exchanged with clients, a minimal request
//! reader and response writer, and the server that routes requests to the
//! broker or the session manager.

pub mod framing;
pub mod message;
pub mod server;

pub use server::{AppState, Server};

#[cfg(test)]
mod tests;
