//! JSON encoding and strict decoding of [`Envelope`]s.
//!
//! [`encode`] always emits the header fields first (`id`, `version`,
//! `kind`, `side`) followed by the payload fields that are set.
//! [`decode`] never panics on hostile input: every failure is a
//! [`DecodeError`] naming the offending field, ready to be turned into an
//! `INVALID` reply.

use serde::Serialize;
use serde_json::{Map, Value};

use super::envelope::{
    ClientBody, Envelope, EvalResult, PROTOCOL_VERSION, Payload, ServerBody, Side,
};
use crate::domain::SessionKey;

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeReason {
    /// The frame is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),
    /// The frame is valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// A required field is absent.
    #[error("field `{0}` is not defined")]
    Missing(&'static str),
    /// A field is present with the wrong JSON type.
    #[error("expected value of `{field}` to be of type {expected}, got {found}")]
    WrongType {
        /// Field name.
        field: &'static str,
        /// Expected JSON type.
        expected: &'static str,
        /// Actual JSON type.
        found: &'static str,
    },
    /// `version` is an integer other than [`PROTOCOL_VERSION`].
    #[error("only version {PROTOCOL_VERSION} is currently supported, got version {0}")]
    UnsupportedVersion(String),
    /// An integer field does not fit in 64 signed bits.
    #[error("field `{0}` is out of range")]
    OutOfRange(&'static str),
    /// `side` is neither `CLIENT` nor `SERVER`.
    #[error("invalid side `{0}`")]
    UnknownSide(String),
    /// `kind` is not defined for the given side.
    #[error("invalid kind `{kind}` for {side} message")]
    UnknownKind {
        /// Side the message claimed.
        side: Side,
        /// Offending kind tag.
        kind: String,
    },
}

impl DecodeReason {
    /// The field this reason refers to, if any.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::Missing(field) | Self::OutOfRange(field) | Self::WrongType { field, .. } => {
                Some(field)
            }
            Self::UnsupportedVersion(_) => Some("version"),
            Self::UnknownSide(_) => Some("side"),
            Self::UnknownKind { .. } => Some("kind"),
            Self::Malformed(_) | Self::NotAnObject(_) => None,
        }
    }
}

/// A frame that failed to decode.
///
/// Carries the correlation id when the frame had a string `id`, so the
/// rejection can be correlated by the sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct DecodeError {
    correlation_id: Option<String>,
    reason: DecodeReason,
}

impl DecodeError {
    fn new(correlation_id: Option<&str>, reason: DecodeReason) -> Self {
        Self {
            correlation_id: correlation_id.map(str::to_owned),
            reason,
        }
    }

    /// The `id` salvaged from the rejected frame.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// What went wrong.
    #[must_use]
    pub const fn reason(&self) -> &DecodeReason {
        &self.reason
    }
}

/// Flat wire shape. Field order here is the order on the wire.
#[derive(Serialize)]
struct WireFrame<'a> {
    id: &'a str,
    version: i64,
    kind: &'static str,
    side: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

impl<'a> WireFrame<'a> {
    fn header(envelope: &'a Envelope) -> Self {
        Self {
            id: &envelope.id,
            version: envelope.version(),
            kind: envelope.kind(),
            side: envelope.side().as_str(),
            key: None,
            success: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            error: None,
            code: None,
        }
    }
}

/// Serializes an envelope to its JSON text frame.
#[must_use]
pub fn encode(envelope: &Envelope) -> String {
    let mut frame = WireFrame::header(envelope);
    match &envelope.payload {
        Payload::Client { key, body } => {
            frame.key = Some(key.expose());
            match body {
                ClientBody::Register | ClientBody::ClientOk => {}
                ClientBody::Error { error } => frame.error = error.as_deref(),
                ClientBody::Result(EvalResult::Success {
                    exit_code,
                    stdout,
                    stderr,
                }) => {
                    frame.success = Some(true);
                    frame.exit_code = *exit_code;
                    frame.stdout = stdout.as_deref();
                    frame.stderr = stderr.as_deref();
                }
                ClientBody::Result(EvalResult::Failure { error }) => {
                    frame.success = Some(false);
                    frame.error = error.as_deref();
                }
            }
        }
        Payload::Server(body) => match body {
            ServerBody::ServerOk | ServerBody::Timeout => {}
            ServerBody::Invalid { error } => frame.error = error.as_deref(),
            ServerBody::Evaluate { code } => frame.code = Some(code),
        },
    }
    // Only strings, integers and booleans: serialization cannot fail.
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Parses and validates a JSON text frame.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the frame is not a JSON object, a required
/// field is missing or mistyped, the version is unsupported, the side is
/// unknown, or the kind is not valid for the side.
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::new(None, DecodeReason::Malformed(e.to_string())))?;
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(DecodeError::new(
                None,
                DecodeReason::NotAnObject(type_name(&other)),
            ));
        }
    };
    let salvaged = fields.get("id").and_then(Value::as_str);
    decode_fields(&fields).map_err(|reason| DecodeError::new(salvaged, reason))
}

fn decode_fields(fields: &Map<String, Value>) -> Result<Envelope, DecodeReason> {
    let id = required_str(fields, "id")?;
    let version = required_int(fields, "version")?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeReason::UnsupportedVersion(version.to_string()));
    }
    let kind = required_str(fields, "kind")?;
    let side = required_str(fields, "side")?;
    let payload = match side.parse::<Side>() {
        Ok(Side::Client) => decode_client(fields, kind)?,
        Ok(Side::Server) => Payload::Server(decode_server(fields, kind)?),
        Err(()) => return Err(DecodeReason::UnknownSide(side.to_owned())),
    };
    Ok(Envelope {
        id: id.to_owned(),
        payload,
    })
}

fn decode_client(fields: &Map<String, Value>, kind: &str) -> Result<Payload, DecodeReason> {
    let key = SessionKey::from(required_str(fields, "key")?);
    let body = match kind {
        "REGISTER" => ClientBody::Register,
        "CLIENTOK" => ClientBody::ClientOk,
        "ERROR" => ClientBody::Error {
            error: optional_str(fields, "error")?,
        },
        "RESULT" => ClientBody::Result(decode_result(fields)?),
        other => {
            return Err(DecodeReason::UnknownKind {
                side: Side::Client,
                kind: other.to_owned(),
            });
        }
    };
    Ok(Payload::Client { key, body })
}

fn decode_server(fields: &Map<String, Value>, kind: &str) -> Result<ServerBody, DecodeReason> {
    match kind {
        "SERVEROK" => Ok(ServerBody::ServerOk),
        "INVALID" => Ok(ServerBody::Invalid {
            error: optional_str(fields, "error")?,
        }),
        "EVALUATE" => Ok(ServerBody::Evaluate {
            code: required_str(fields, "code")?.to_owned(),
        }),
        "TIMEOUT" => Ok(ServerBody::Timeout),
        other => Err(DecodeReason::UnknownKind {
            side: Side::Server,
            kind: other.to_owned(),
        }),
    }
}

fn decode_result(fields: &Map<String, Value>) -> Result<EvalResult, DecodeReason> {
    let success = match fields.get("success") {
        None => return Err(DecodeReason::Missing("success")),
        Some(Value::Bool(b)) => *b,
        Some(other) => return Err(wrong_type("success", "bool", other)),
    };
    if success {
        Ok(EvalResult::Success {
            exit_code: optional_int(fields, "exit_code")?,
            stdout: optional_str(fields, "stdout")?,
            stderr: optional_str(fields, "stderr")?,
        })
    } else {
        Ok(EvalResult::Failure {
            error: optional_str(fields, "error")?,
        })
    }
}

fn required_str<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, DecodeReason> {
    match fields.get(field) {
        None => Err(DecodeReason::Missing(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(wrong_type(field, "string", other)),
    }
}

fn optional_str(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, DecodeReason> {
    match fields.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(field, "string", other)),
    }
}

fn required_int(fields: &Map<String, Value>, field: &'static str) -> Result<i64, DecodeReason> {
    optional_int(fields, field)?.ok_or(DecodeReason::Missing(field))
}

fn optional_int(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, DecodeReason> {
    match fields.get(field) {
        None => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            None if n.is_u64() && field == "version" => {
                Err(DecodeReason::UnsupportedVersion(n.to_string()))
            }
            None if n.is_u64() => Err(DecodeReason::OutOfRange(field)),
            None => Err(DecodeReason::WrongType {
                field,
                expected: "integer",
                found: "float",
            }),
        },
        Some(other) => Err(wrong_type(field, "integer", other)),
    }
}

fn wrong_type(field: &'static str, expected: &'static str, found: &Value) -> DecodeReason {
    DecodeReason::WrongType {
        field,
        expected,
        found: type_name(found),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
