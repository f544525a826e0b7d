//! Evaluator wire protocol: versioned JSON envelopes.
//!
//! One [`Envelope`] travels per WebSocket text frame. Envelopes are
//! tagged by sender [`Side`] and a kind string; see [`codec`] for the
//! wire format and validation rules.

pub mod codec;
pub mod envelope;

pub use codec::{DecodeError, DecodeReason, decode, encode};
pub use envelope::{ClientBody, Envelope, EvalResult, PROTOCOL_VERSION, Payload, ServerBody, Side};
