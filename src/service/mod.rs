//! Service layer: the front-end caller of the broker.
//!
//! [`EvalService`] turns evaluation requests into conversations on the
//! right evaluator session and manages evaluator keys.

pub mod eval_service;

pub use eval_service::{EvalService, Evaluation, IssuedKey, SessionInfo};
