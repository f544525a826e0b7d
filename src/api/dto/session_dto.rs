//! DTOs for live session listing.

use serde::Serialize;
use utoipa::ToSchema;

use crate::service::SessionInfo;

/// One live evaluator session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionDto {
    /// Owner of the language.
    pub owner_id: u64,
    /// Primary language name.
    pub name: String,
    /// Short name.
    pub short: String,
}

impl From<SessionInfo> for SessionDto {
    fn from(info: SessionInfo) -> Self {
        Self {
            owner_id: info.owner_id,
            name: info.name,
            short: info.short,
        }
    }
}

/// Response body for `GET /sessions`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionListResponse {
    /// Live sessions ordered by language name.
    pub data: Vec<SessionDto>,
    /// Number of live sessions.
    pub total: usize,
}
