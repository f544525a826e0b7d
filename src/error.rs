//! Broker error types with `INVALID` reply and HTTP status mapping.
//!
//! [`BrokerError`] is the central error type. Protocol, auth, and state
//! errors raised inside a connection's read loop are answered on the wire
//! with an `INVALID` envelope whose text is the error's `Display`. Errors
//! reaching the HTTP front-end map to a status code and a structured JSON
//! body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::protocol::{DecodeError, Side};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4001,
///     "message": "evaluator did not reply within 5000 ms",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see [`BrokerError`] code ranges).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Coarse classification of a [`BrokerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or unsupported envelope.
    Protocol,
    /// Invalid or unknown key.
    Auth,
    /// Message not acceptable in the connection's current state.
    State,
    /// The caller's deadline passed.
    RemoteTimeout,
    /// The evaluator reported a failure or answered nonsensically.
    RemoteFailure,
    /// The connection dropped mid-exchange.
    TransportClosed,
    /// Bad input on the front-end.
    Request,
    /// Broker-side fault.
    Internal,
}

/// Broker error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category                 | HTTP Status                  |
/// |-----------|--------------------------|------------------------------|
/// | 1000–1999 | Protocol / validation    | 400 Bad Request              |
/// | 2000–2999 | Auth / state / not found | 401 / 404 / 409 / 503        |
/// | 3000–3999 | Server                   | 500 Internal Server Error    |
/// | 4000–4999 | Remote evaluator         | 502 Bad Gateway / 504        |
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The frame could not be decoded.
    #[error("{0}")]
    Protocol(#[from] DecodeError),

    /// An evaluator sent a message tagged with the broker's side.
    #[error("Expected CLIENT side message, got {0}")]
    UnexpectedSide(Side),

    /// The key is not known to the session store.
    #[error("Invalid key. Request a new one and register again")]
    InvalidKey,

    /// Another connection already holds a session for this key.
    #[error("Client already logged in. Request a new key to invalidate that session")]
    SessionTaken,

    /// `REGISTER` on an already registered connection.
    #[error("Already registered")]
    AlreadyRegistered,

    /// Traffic other than `REGISTER` before registration.
    #[error("Client needs to be registered first")]
    NotRegistered,

    /// A reply named a conversation id that is not open.
    #[error("No active conversation with that id")]
    UnknownConversation,

    /// The evaluator did not reply before the caller's deadline.
    #[error("evaluator did not reply within {waited_ms} ms")]
    RemoteTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The evaluator reported an error while handling the request.
    #[error("evaluator failed: {}", .0.as_deref().unwrap_or("no diagnostic"))]
    RemoteFailure(Option<String>),

    /// The evaluator answered with a message kind that is not a reply.
    #[error("evaluator sent unexpected {0} reply")]
    UnexpectedReply(&'static str),

    /// The connection closed before the exchange completed.
    #[error("evaluator connection closed")]
    TransportClosed,

    /// The evaluator stopped reading and its outbound queue is full.
    #[error("evaluator is not reading, outbound queue full")]
    Backpressure,

    /// No language is registered under that name.
    #[error("no such language `{0}` registered")]
    LanguageNotFound(String),

    /// The language exists but its evaluator is not connected.
    #[error("{0}'s evaluator is currently not available")]
    SessionOffline(String),

    /// Front-end request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The language could not be registered.
    #[error("cannot register language: {0}")]
    Registration(String),

    /// The session store could not be persisted.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal broker error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Protocol(_) | Self::UnexpectedSide(_) => ErrorCategory::Protocol,
            Self::InvalidKey => ErrorCategory::Auth,
            Self::SessionTaken
            | Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::UnknownConversation => ErrorCategory::State,
            Self::RemoteTimeout { .. } => ErrorCategory::RemoteTimeout,
            Self::RemoteFailure(_) | Self::UnexpectedReply(_) => ErrorCategory::RemoteFailure,
            Self::TransportClosed | Self::Backpressure => ErrorCategory::TransportClosed,
            Self::LanguageNotFound(_)
            | Self::SessionOffline(_)
            | Self::InvalidRequest(_)
            | Self::Registration(_) => ErrorCategory::Request,
            Self::Persistence(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns `true` for errors a connection answers with `INVALID` and
    /// then keeps reading.
    #[must_use]
    pub const fn is_recoverable_in_session(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol | ErrorCategory::Auth | ErrorCategory::State
        )
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Protocol(_) => 1001,
            Self::UnexpectedSide(_) => 1002,
            Self::InvalidRequest(_) => 1003,
            Self::InvalidKey => 2001,
            Self::SessionTaken => 2002,
            Self::AlreadyRegistered => 2003,
            Self::NotRegistered => 2004,
            Self::UnknownConversation => 2005,
            Self::LanguageNotFound(_) => 2006,
            Self::SessionOffline(_) => 2007,
            Self::Registration(_) => 2008,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::RemoteTimeout { .. } => 4001,
            Self::RemoteFailure(_) => 4002,
            Self::UnexpectedReply(_) => 4003,
            Self::TransportClosed => 4004,
            Self::Backpressure => 4005,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol(_) | Self::UnexpectedSide(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidKey => StatusCode::UNAUTHORIZED,
            Self::LanguageNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionTaken
            | Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::UnknownConversation
            | Self::Registration(_) => StatusCode::CONFLICT,
            Self::SessionOffline(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RemoteTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::RemoteFailure(_)
            | Self::UnexpectedReply(_)
            | Self::TransportClosed
            | Self::Backpressure => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(category = ?self.category(), error = %self, "request failed");
        }
        let details = match &self {
            Self::RemoteFailure(diagnostic) => diagnostic.clone(),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
