//! Envelope and payload types exchanged with evaluators.
//!
//! Every frame on the wire is one [`Envelope`]. The envelope carries a
//! correlation id and a [`Payload`] whose variant is selected first by
//! the sending [`Side`] and then by the payload kind.

use std::fmt;
use std::str::FromStr;

use crate::domain::SessionKey;

/// The only protocol version this broker speaks.
pub const PROTOCOL_VERSION: i64 = 0;

/// Which party produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The remote evaluator.
    Client,
    /// The broker.
    Server,
}

impl Side {
    /// Wire representation (`"CLIENT"` / `"SERVER"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Server => "SERVER",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLIENT" => Ok(Self::Client),
            "SERVER" => Ok(Self::Server),
            _ => Err(()),
        }
    }
}

/// Outcome of an evaluation as reported in a `RESULT` message.
///
/// The two variants mirror the `success` flag on the wire; fields of one
/// branch can never appear alongside the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalResult {
    /// The evaluator ran the code.
    Success {
        /// Process exit code, when the evaluator reports one.
        exit_code: Option<i64>,
        /// Captured standard output.
        stdout: Option<String>,
        /// Captured standard error.
        stderr: Option<String>,
    },
    /// The evaluator could not run the code (e.g. compilation failed).
    Failure {
        /// Diagnostic text.
        error: Option<String>,
    },
}

impl EvalResult {
    /// Returns `true` for [`EvalResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Messages sent by an evaluator. All of them carry the evaluator's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientBody {
    /// `REGISTER`: bind this connection to the key.
    Register,
    /// `CLIENTOK`: generic acknowledgement.
    ClientOk,
    /// `ERROR`: the evaluator failed while handling a request.
    Error {
        /// Optional diagnostic.
        error: Option<String>,
    },
    /// `RESULT`: answer to an `EVALUATE` request.
    Result(EvalResult),
}

impl ClientBody {
    /// Wire kind tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::ClientOk => "CLIENTOK",
            Self::Error { .. } => "ERROR",
            Self::Result(_) => "RESULT",
        }
    }
}

/// Messages sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerBody {
    /// `SERVEROK`: registration accepted.
    ServerOk,
    /// `INVALID`: the referenced message was rejected.
    Invalid {
        /// Human-readable reason.
        error: Option<String>,
    },
    /// `EVALUATE`: run `code` and answer with `RESULT`.
    Evaluate {
        /// Source text to evaluate.
        code: String,
    },
    /// `TIMEOUT`: the caller gave up waiting on this conversation.
    Timeout,
}

impl ServerBody {
    /// Wire kind tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServerOk => "SERVEROK",
            Self::Invalid { .. } => "INVALID",
            Self::Evaluate { .. } => "EVALUATE",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// Side-tagged payload of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Evaluator → broker.
    Client {
        /// The evaluator's secret key.
        key: SessionKey,
        /// Kind-specific body.
        body: ClientBody,
    },
    /// Broker → evaluator.
    Server(ServerBody),
}

/// Outer message wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation identifier.
    pub id: String,
    /// Side- and kind-specific content.
    pub payload: Payload,
}

impl Envelope {
    /// Builds a broker-side envelope.
    #[must_use]
    pub fn server(id: impl Into<String>, body: ServerBody) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Server(body),
        }
    }

    /// Builds an evaluator-side envelope.
    #[must_use]
    pub fn client(id: impl Into<String>, key: SessionKey, body: ClientBody) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Client { key, body },
        }
    }

    /// Builds an `INVALID` reply for the given correlation id.
    #[must_use]
    pub fn invalid(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::server(
            id,
            ServerBody::Invalid {
                error: Some(error.into()),
            },
        )
    }

    /// Protocol version; always [`PROTOCOL_VERSION`].
    #[must_use]
    pub const fn version(&self) -> i64 {
        PROTOCOL_VERSION
    }

    /// Sending side.
    #[must_use]
    pub const fn side(&self) -> Side {
        match self.payload {
            Payload::Client { .. } => Side::Client,
            Payload::Server(_) => Side::Server,
        }
    }

    /// Wire kind tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match &self.payload {
            Payload::Client { body, .. } => body.kind(),
            Payload::Server(body) => body.kind(),
        }
    }
}
