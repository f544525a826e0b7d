//! Evaluator WebSocket layer: upgrade handler, connection loops, and the
//! per-connection broker state machine.
//!
//! The endpoint at `/ws` speaks the envelope protocol in
//! [`crate::protocol`]: evaluators register with their key, then answer
//! the broker's `EVALUATE` requests under the request's correlation id.

pub mod connection;
pub mod handler;
pub mod session;

pub use session::{BrokerSession, SessionState};
