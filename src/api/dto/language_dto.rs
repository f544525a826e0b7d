//! DTOs for evaluator key issuance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /languages`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IssueKeyRequest {
    /// Owner of the language. One language per owner.
    pub owner_id: u64,
    /// Primary language name.
    pub name: String,
    /// Optional short name. Defaults to `name`.
    #[serde(default)]
    pub short: Option<String>,
}

/// Response body for `POST /languages` (201 Created).
///
/// This is the only place the full key is ever shown.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssueKeyResponse {
    /// Secret key the evaluator registers with.
    pub key: String,
    /// Primary language name.
    pub name: String,
    /// Short name.
    pub short: String,
    /// Whether a previous language of this owner was replaced.
    pub replaced: bool,
    /// Whether a live session on the previous key was evicted.
    pub evicted: bool,
    /// Issue timestamp.
    pub issued_at: DateTime<Utc>,
}
