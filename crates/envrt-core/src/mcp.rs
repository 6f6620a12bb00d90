//! MCP method payloads shared by server and client

use serde::{Deserialize, Serialize};

use crate::observation::CallToolObservation;
use crate::tool::{Tool, ToolError};

pub const MCP_PROTOCOL_VERSION: &str = "2025-11-25";

/// `tools/list` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// `tools/call` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Text content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl TextContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".into(),
            text: text.into(),
        }
    }
}

/// `tools/call` result
///
/// Framework failures are reported in `error` with `isError` set, so callers
/// can tell a missing tool from a tool whose own logic failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<TextContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl CallToolResult {
    pub fn into_outcome(self) -> Result<serde_json::Value, ToolError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.structured_content.unwrap_or(serde_json::Value::Null)),
        }
    }
}

impl From<CallToolObservation> for CallToolResult {
    fn from(obs: CallToolObservation) -> Self {
        match obs.error {
            Some(err) => Self {
                content: vec![TextContent::text(err.message.clone())],
                structured_content: None,
                is_error: true,
                error: Some(err),
            },
            None => {
                let text = match &obs.result {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Self {
                    content: vec![TextContent::text(text)],
                    structured_content: Some(obs.result),
                    is_error: false,
                    error: None,
                }
            }
        }
    }
}

/// Server info returned from `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// `initialize` result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub server_info: ServerInfo,
}
