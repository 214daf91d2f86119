//! Error normalization.
//!
//! Every error that crosses the transport boundary is a [`NormalizedError`].
//! Adapters hand whatever their protocol produced to [`normalize_error`]:
//! plain messages, Rust errors, or JSON error bodies in the common REST,
//! GraphQL and validation shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known machine codes.
pub struct ErrorCode;

impl ErrorCode {
    /// A read was attempted while disconnected. Synthetic, never sent by a server.
    pub const NETWORK_OFFLINE: &'static str = "NETWORK_OFFLINE";
    /// The access credential is missing or expired.
    pub const AUTH_UNAUTHORIZED: &'static str = "AUTH_UNAUTHORIZED";
    /// The refresh endpoint did not produce a new credential.
    pub const AUTH_REFRESH_FAILED: &'static str = "AUTH_REFRESH_FAILED";
    /// The adapter does not support the requested call.
    pub const NOT_IMPLEMENTED: &'static str = "NOT_IMPLEMENTED";
    /// The adapter does not know the requested operation.
    pub const UNKNOWN_OPERATION: &'static str = "UNKNOWN_OPERATION";
    /// The request or response payload could not be interpreted.
    pub const INVALID_PAYLOAD: &'static str = "INVALID_PAYLOAD";
}

/// The single error shape seen by callers of the transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct NormalizedError {
    /// Machine-readable code, e.g. `NETWORK_OFFLINE`.
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// HTTP-style status, when the protocol has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// The original error, kept for logging.
    #[serde(default)]
    pub raw: Value,
}

impl NormalizedError {
    /// Creates an error with a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: Some(code.into()),
            raw: Value::String(message.clone()),
            message,
            status: None,
        }
    }

    /// The facade's offline short-circuit error.
    pub fn offline(what: &str) -> Self {
        Self::new(
            ErrorCode::NETWORK_OFFLINE,
            format!("offline: {what} is not available"),
        )
    }

    /// An expired or missing credential.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AUTH_UNAUTHORIZED, message).with_status(401)
    }

    /// Sets the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the raw payload.
    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    /// Returns true if the code equals `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Returns true for the facade's offline short-circuit.
    pub fn is_offline(&self) -> bool {
        self.has_code(ErrorCode::NETWORK_OFFLINE)
    }

    /// Returns true if the credential was rejected as missing or expired.
    pub fn is_auth_expired(&self) -> bool {
        self.status == Some(401) || self.has_code(ErrorCode::AUTH_UNAUTHORIZED)
    }

    /// Returns true for transient server errors (5xx and 429).
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, Some(s) if s >= 500 || s == 429)
    }
}

/// Any error shape an adapter can produce.
#[derive(Debug)]
pub enum RawError {
    /// A bare message.
    Message(String),
    /// A Rust error value.
    Native(Box<dyn std::error::Error + Send + Sync>),
    /// A protocol-specific JSON error body.
    Shape(Value),
    /// An error that was already normalized.
    Normalized(NormalizedError),
}

impl From<&str> for RawError {
    fn from(s: &str) -> Self {
        RawError::Message(s.to_string())
    }
}

impl From<String> for RawError {
    fn from(s: String) -> Self {
        RawError::Message(s)
    }
}

impl From<Value> for RawError {
    fn from(v: Value) -> Self {
        RawError::Shape(v)
    }
}

impl From<NormalizedError> for RawError {
    fn from(e: NormalizedError) -> Self {
        RawError::Normalized(e)
    }
}

impl From<std::io::Error> for RawError {
    fn from(e: std::io::Error) -> Self {
        RawError::Native(Box::new(e))
    }
}

impl From<serde_json::Error> for RawError {
    fn from(e: serde_json::Error) -> Self {
        RawError::Native(Box::new(e))
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for RawError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        RawError::Native(e)
    }
}

/// Converts any error shape into a [`NormalizedError`].
///
/// Normalizing an already-normalized error returns it unchanged.
pub fn normalize_error(error: impl Into<RawError>) -> NormalizedError {
    match error.into() {
        RawError::Normalized(e) => e,
        RawError::Message(message) => NormalizedError {
            code: None,
            raw: Value::String(message.clone()),
            message,
            status: None,
        },
        RawError::Native(e) => {
            let message = e.to_string();
            NormalizedError {
                code: None,
                raw: Value::String(message.clone()),
                message,
                status: None,
            }
        }
        RawError::Shape(Value::String(message)) => normalize_error(message),
        RawError::Shape(value) => NormalizedError {
            code: extract_code(&value),
            message: extract_message(&value),
            status: extract_status(&value),
            raw: value,
        },
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn extract_message(e: &Value) -> String {
    // GraphQL
    if let Some(first) = e
        .get("graphQLErrors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
    {
        return non_empty_str(first.get("message"))
            .unwrap_or("GraphQL error")
            .to_string();
    }

    // REST response body
    let data = e.pointer("/response/data");
    if let Some(m) = non_empty_str(data.and_then(|d| d.get("message"))) {
        return m.to_string();
    }
    if let Some(m) = non_empty_str(data.and_then(|d| d.get("error"))) {
        return m.to_string();
    }

    // Validation issue list
    if let Some(issues) = e.get("errors").and_then(Value::as_array) {
        return issues
            .iter()
            .filter_map(|i| i.get("message").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(", ");
    }

    non_empty_str(e.get("message"))
        .unwrap_or("Unknown error")
        .to_string()
}

fn code_part(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_code(e: &Value) -> Option<String> {
    code_part(e.get("code"))
        .or_else(|| code_part(e.pointer("/response/data/code")))
        .or_else(|| code_part(e.pointer("/graphQLErrors/0/extensions/code")))
}

fn extract_status(e: &Value) -> Option<u16> {
    e.pointer("/response/status")
        .or_else(|| e.get("status"))
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
}

impl From<std::io::Error> for NormalizedError {
    fn from(e: std::io::Error) -> Self {
        normalize_error(e)
    }
}

impl From<serde_json::Error> for NormalizedError {
    fn from(e: serde_json::Error) -> Self {
        let mut normalized = normalize_error(e);
        normalized.code = Some(ErrorCode::INVALID_PAYLOAD.to_string());
        normalized
    }
}
