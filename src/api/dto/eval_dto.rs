//! DTOs for `POST /eval`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::protocol::EvalResult;
use crate::service::Evaluation;

/// Request body for `POST /eval`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EvalRequest {
    /// Primary or short name of the target language.
    pub language: String,
    /// Source code to evaluate.
    pub code: String,
}

/// Response body for a completed evaluation.
///
/// `exit_code`, `stdout` and `stderr` are set only on success; `error`
/// only on failure.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EvalResponse {
    /// Primary name of the language that ran the code.
    pub language: String,
    /// Whether the evaluator ran the code.
    pub success: bool,
    /// Process exit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Captured standard output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Failure description from the evaluator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Round-trip time in milliseconds.
    pub elapsed_ms: u64,
}

impl From<Evaluation> for EvalResponse {
    fn from(eval: Evaluation) -> Self {
        let elapsed_ms = u64::try_from(eval.elapsed.as_millis()).unwrap_or(u64::MAX);
        let base = Self {
            language: eval.language,
            success: eval.result.is_success(),
            exit_code: None,
            stdout: None,
            stderr: None,
            error: None,
            elapsed_ms,
        };
        match eval.result {
            EvalResult::Success {
                exit_code,
                stdout,
                stderr,
            } => Self {
                exit_code,
                stdout,
                stderr,
                ..base
            },
            EvalResult::Failure { error } => Self { error, ..base },
        }
    }
}
