//! # eval-broker
//!
//! WebSocket session broker between remote code evaluators and HTTP
//! callers.
//!
//! Evaluators connect over `/ws`, register with a secret key, and then
//! answer `EVALUATE` requests. Each request is a *conversation*: a
//! server-minted id correlating exactly one reply, multiplexed with any
//! number of other conversations on the same socket. Callers reach the
//! evaluators through the REST API.
//!
//! ## Architecture
//!
//! ```text
//! HTTP callers                Evaluators (WebSocket)
//!     │                            │
//!     ├── REST Handlers (api/)     ├── Broker loop (ws/)
//!     │                            │
//!     ├── EvalService (service/)   ├── Envelope codec (protocol/)
//!     │                            │
//!     └──── ConnectionRegistry + ConversationTable (domain/)
//!                     │
//!             LanguageStore (store/, JSON snapshot)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod service;
pub mod store;
pub mod ws;
