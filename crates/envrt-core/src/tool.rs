//! Tool descriptors and tool-level errors

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SchemaError, SchemaErrorKind};

/// Operation names that can never be used as tool names
pub const RESERVED_TOOL_NAMES: [&str; 4] = ["reset", "step", "state", "close"];

/// Whether `name` collides with a runtime operation
pub fn is_reserved_tool_name(name: &str) -> bool {
    RESERVED_TOOL_NAMES.contains(&name)
}

/// A named, schema-described capability exposed by an environment
///
/// Deserializing goes through [`Tool::new`], so reserved names are rejected
/// on the wire as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", try_from = "RawTool")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema object describing the arguments
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl Tool {
    /// Build a tool, rejecting reserved names
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if is_reserved_tool_name(&name) {
            return Err(SchemaError::new(
                SchemaErrorKind::ReservedToolName,
                "name",
                format!("`{}` is reserved and cannot be registered as a tool", name),
            ));
        }
        Ok(Self {
            name,
            description: description.into(),
            input_schema,
            output_schema: None,
        })
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Unvalidated wire form of [`Tool`]
#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct RawTool {
    name: String,
    #[serde(default)]
    description: String,
    input_schema: serde_json::Value,
    #[serde(default)]
    output_schema: Option<serde_json::Value>,
}

impl TryFrom<RawTool> for Tool {
    type Error = SchemaError;

    fn try_from(raw: RawTool) -> Result<Self, SchemaError> {
        let tool = Tool::new(raw.name, raw.description, raw.input_schema)?;
        Ok(match raw.output_schema {
            Some(schema) => tool.with_output_schema(schema),
            None => tool,
        })
    }
}

/// Framework-level failure category for a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorType {
    ExecutionError,
    InvalidArgs,
    TransportError,
    ToolNotFound,
    Timeout,
}

impl fmt::Display for ToolErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorType::ExecutionError => "execution_error",
            ToolErrorType::InvalidArgs => "invalid_args",
            ToolErrorType::TransportError => "transport_error",
            ToolErrorType::ToolNotFound => "tool_not_found",
            ToolErrorType::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Tool call failure carried in-band inside a call observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct ToolError {
    pub error_type: ToolErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolError {
    pub fn new(error_type: ToolErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorType::ExecutionError, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ToolErrorType::InvalidArgs, message)
    }

    pub fn not_found(tool_name: &str) -> Self {
        Self::new(
            ToolErrorType::ToolNotFound,
            format!("Tool not found: {}", tool_name),
        )
    }

    pub fn reserved(tool_name: &str) -> Self {
        Self::invalid_args(format!(
            "`{}` is a reserved operation and cannot be called as a tool",
            tool_name
        ))
    }
}
