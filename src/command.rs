//! Command and response envelope models.
//!
//! Commands arrive as JSON objects with a `type` tag. They are decoded once
//! at the boundary into a closed enum so downstream code is statically
//! exhaustive; unrecognized types are kept as an `Extension` variant for the
//! custom handler seam.

use serde_json::Value as JsonValue;

use crate::error::{ErrorKind, GatewayError, Result};

/// Output encoding for data-bearing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Json,
    Arrow,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Arrow => "arrow",
        }
    }
}

/// A decoded client command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Side-effecting execution with no materialized result.
    Exec {
        sql: String,
        query_id: Option<String>,
    },
    /// Execute and materialize the result set in the requested encoding.
    Query {
        format: OutputFormat,
        sql: String,
        query_id: Option<String>,
    },
    /// Interrupt the in-flight query registered under `query_id`.
    Cancel { query_id: String },
    /// A command type the built-ins do not recognize. Only meaningful to a
    /// configured custom handler; otherwise rejected as a decode error.
    Extension(ExtensionCommand),
}

/// Raw payload for commands handled outside the built-in set.
#[derive(Debug, Clone)]
pub struct ExtensionCommand {
    pub name: String,
    pub payload: JsonValue,
}

impl Command {
    /// Decode a raw JSON command object.
    ///
    /// Missing or mistyped required fields for a recognized `type` are
    /// decode errors; an unrecognized `type` becomes `Extension`.
    pub fn from_value(raw: &JsonValue) -> Result<Command> {
        let kind = raw
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| GatewayError::Decode("missing or non-string 'type' field".into()))?;

        match kind {
            "exec" => Ok(Command::Exec {
                sql: required_sql(raw, kind)?,
                query_id: optional_query_id(raw)?,
            }),
            "json" => Ok(Command::Query {
                format: OutputFormat::Json,
                sql: required_sql(raw, kind)?,
                query_id: optional_query_id(raw)?,
            }),
            "arrow" => Ok(Command::Query {
                format: OutputFormat::Arrow,
                sql: required_sql(raw, kind)?,
                query_id: optional_query_id(raw)?,
            }),
            "cancel" => {
                let query_id = optional_query_id(raw)?.ok_or_else(|| {
                    GatewayError::Decode("'cancel' requires a 'queryId' field".into())
                })?;
                Ok(Command::Cancel { query_id })
            }
            other => Ok(Command::Extension(ExtensionCommand {
                name: other.to_string(),
                payload: raw.clone(),
            })),
        }
    }
}

fn required_sql(raw: &JsonValue, kind: &str) -> Result<String> {
    match raw.get("sql") {
        Some(JsonValue::String(sql)) => Ok(sql.clone()),
        Some(_) => Err(GatewayError::Decode(format!(
            "'sql' must be a string for '{kind}'"
        ))),
        None => Err(GatewayError::Decode(format!(
            "missing 'sql' field for '{kind}'"
        ))),
    }
}

fn optional_query_id(raw: &JsonValue) -> Result<Option<String>> {
    match raw.get("queryId") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(id)) => Ok(Some(id.clone())),
        Some(_) => Err(GatewayError::Decode("'queryId' must be a string".into())),
    }
}

/// The tagged outcome of a command.
///
/// Every code path ends in exactly one envelope, whether from a built-in
/// handler, a cache hit, or a custom handler.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// Successful execution with no payload.
    Done,
    /// A complete JSON document (already serialized).
    Json { data: String },
    /// An Arrow IPC stream. Written as binary by the transport adapters.
    Arrow { data: Vec<u8> },
    /// Failure, with a class tag so clients can distinguish cancellation
    /// from execution errors.
    Error { kind: ErrorKind, message: String },
}

impl Envelope {
    /// Wrap encoded payload bytes in the envelope for their format.
    ///
    /// Used both for fresh executions and cache hits, so the payload bytes
    /// served on a hit are identical to the ones cached.
    pub fn payload(format: OutputFormat, bytes: Vec<u8>) -> Result<Envelope> {
        match format {
            OutputFormat::Json => {
                let data = String::from_utf8(bytes)
                    .map_err(|_| GatewayError::Cache("JSON payload is not valid UTF-8".into()))?;
                Ok(Envelope::Json { data })
            }
            OutputFormat::Arrow => Ok(Envelope::Arrow { data: bytes }),
        }
    }

    /// Render the envelope as a JSON text body.
    ///
    /// Arrow envelopes are delivered as raw binary by the transports and
    /// never go through this path; the bare tag is returned as a fallback.
    pub fn json_body(&self) -> String {
        match self {
            Envelope::Done => r#"{"type":"done"}"#.to_string(),
            // `data` is a serialized JSON document; splice it in verbatim
            // so cached bytes round-trip unchanged.
            Envelope::Json { data } => format!(r#"{{"type":"json","data":{data}}}"#),
            Envelope::Arrow { .. } => r#"{"type":"arrow"}"#.to_string(),
            Envelope::Error { kind, message } => serde_json::json!({
                "type": "error",
                "error": message,
                "kind": kind.as_str(),
            })
            .to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Envelope::Error { .. })
    }
}

impl From<GatewayError> for Envelope {
    fn from(err: GatewayError) -> Self {
        Envelope::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
