//! Data Transfer Objects for REST request/response serialization.

pub mod eval_dto;
pub mod language_dto;
pub mod session_dto;

pub use eval_dto::*;
pub use language_dto::*;
pub use session_dto::*;
