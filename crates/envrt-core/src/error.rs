//! Error types for envrt

use std::fmt;
use thiserror::Error;

/// Result type for envrt operations
pub type Result<T> = std::result::Result<T, EnvError>;

/// Runtime error taxonomy shared by every transport
#[derive(Debug, Error)]
pub enum EnvError {
    /// Malformed or invalid wire payload
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Unknown or closed session id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Admission rejected, the server is at capacity
    #[error("Session capacity reached ({current}/{max})")]
    SessionCapacity { current: usize, max: usize },

    /// Session could not be registered after the environment was built
    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    /// The environment factory raised while building an environment
    #[error("Environment factory failed: {0}")]
    EnvironmentFactory(String),

    /// Invalid startup configuration
    #[error("Invalid concurrency configuration: {0}")]
    ConcurrencyConfiguration(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Environment-specific failure
    #[error("Environment error: {0}")]
    Environment(String),

    /// I/O failure on a transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl EnvError {
    /// Stable machine-readable code used in WebSocket error frames and HTTP bodies
    pub fn code(&self) -> &'static str {
        match self {
            EnvError::Schema(_) => "schema_error",
            EnvError::SessionNotFound(_) => "session_not_found",
            EnvError::SessionCapacity { .. } => "session_capacity",
            EnvError::SessionCreation(_) => "session_creation",
            EnvError::EnvironmentFactory(_) => "environment_factory",
            EnvError::ConcurrencyConfiguration(_) => "concurrency_configuration",
            EnvError::Timeout(_) => "timeout",
            EnvError::Environment(_) => "environment_error",
            EnvError::Transport(_) => "transport_error",
            EnvError::Protocol(_) => "protocol_error",
        }
    }

    /// JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i32 {
        match self {
            EnvError::Schema(_) => error_codes::INVALID_PARAMS,
            EnvError::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            EnvError::SessionCapacity { .. } => error_codes::SESSION_CAPACITY,
            EnvError::Timeout(_) => error_codes::TIMEOUT,
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        EnvError::Schema(SchemaError::from(err))
    }
}

/// Category of a schema failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Discriminator names no registered variant
    UnknownVariant,
    /// A required field is absent
    MissingField,
    /// A field has the wrong shape or type
    InvalidValue,
    /// Payload is not valid JSON at all
    Malformed,
    /// Tool name collides with a reserved operation
    ReservedToolName,
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaErrorKind::UnknownVariant => "unknown_variant",
            SchemaErrorKind::MissingField => "missing_field",
            SchemaErrorKind::InvalidValue => "invalid_value",
            SchemaErrorKind::Malformed => "malformed",
            SchemaErrorKind::ReservedToolName => "reserved_tool_name",
        };
        f.write_str(s)
    }
}

/// Wire payload failed validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Schema error ({kind}) at `{path}`: {message}")]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    /// Dotted path of the offending field, `$` for the payload root
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unknown_variant(path: impl Into<String>, tag: &str) -> Self {
        Self::new(
            SchemaErrorKind::UnknownVariant,
            path,
            format!("unknown variant `{}`", tag),
        )
    }

    pub fn missing_field(path: impl Into<String>) -> Self {
        let path = path.into();
        let message = format!("missing field `{}`", path);
        Self::new(SchemaErrorKind::MissingField, path, message)
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(SchemaErrorKind::InvalidValue, path, message)
    }

    /// Prefix the path with a parent field
    pub fn within(mut self, parent: &str) -> Self {
        self.path = if self.path == "$" {
            parent.to_string()
        } else {
            format!("{}.{}", parent, self.path)
        };
        self
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        let message = err.to_string();
        if err.is_syntax() || err.is_eof() {
            return SchemaError::new(SchemaErrorKind::Malformed, "$", message);
        }
        // serde reports field names between backticks, e.g. "missing field `tool_name`"
        let field = message
            .split('`')
            .nth(1)
            .map(str::to_string)
            .unwrap_or_else(|| "$".to_string());
        if message.starts_with("missing field") {
            SchemaError::new(SchemaErrorKind::MissingField, field, message)
        } else if message.starts_with("unknown variant") {
            SchemaError::new(SchemaErrorKind::UnknownVariant, "type", message)
        } else if message.starts_with("unknown field") {
            SchemaError::new(SchemaErrorKind::InvalidValue, field, message)
        } else {
            SchemaError::new(SchemaErrorKind::InvalidValue, "$", message)
        }
    }
}

/// JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const SESSION_NOT_FOUND: i32 = -32000;
    pub const SESSION_CAPACITY: i32 = -32001;
    pub const TIMEOUT: i32 = -32002;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_path_extracted() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Probe {
            tool_name: String,
        }
        let err = serde_json::from_str::<Probe>("{}").unwrap_err();
        let schema = SchemaError::from(err);
        assert_eq!(schema.kind, SchemaErrorKind::MissingField);
        assert_eq!(schema.path, "tool_name");
    }

    #[test]
    fn test_syntax_error_is_malformed() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let schema = SchemaError::from(err);
        assert_eq!(schema.kind, SchemaErrorKind::Malformed);
        assert_eq!(schema.path, "$");
    }

    #[test]
    fn test_within_nests_path() {
        let err = SchemaError::missing_field("tool_name").within("action");
        assert_eq!(err.path, "action.tool_name");
        let root = SchemaError::invalid("$", "bad").within("action");
        assert_eq!(root.path, "action");
    }

    #[test]
    fn test_codes_are_distinct_for_capacity_and_not_found() {
        let cap = EnvError::SessionCapacity { current: 2, max: 2 };
        let missing = EnvError::SessionNotFound("x".into());
        assert_ne!(cap.code(), missing.code());
        assert_ne!(cap.rpc_code(), missing.rpc_code());
    }
}
