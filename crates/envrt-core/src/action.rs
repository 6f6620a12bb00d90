//! Action types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::codec::{UnionDecoder, decode_plain};
use crate::error::SchemaError;

/// Arguments for a single tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallToolAction {
    /// Name of the tool to invoke
    pub tool_name: String,
    /// Tool arguments, validated by the tool itself
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Reserved MCP actions, discriminated on the wire by `type`
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpAction {
    /// Discover the tools the environment exposes
    ListTools,
    /// Invoke one tool
    CallTool(CallToolAction),
}

impl McpAction {
    pub fn call(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        McpAction::CallTool(CallToolAction {
            tool_name: tool_name.into(),
            arguments,
        })
    }
}

// Payloads without a discriminator predate `list_tools` and are always tool calls.
static MCP_ACTIONS: LazyLock<UnionDecoder<McpAction>> = LazyLock::new(|| {
    UnionDecoder::new("type")
        .variant("list_tools", |_| Ok(McpAction::ListTools))
        .variant("call_tool", |fields| {
            decode_plain::<CallToolAction>(fields).map(McpAction::CallTool)
        })
        .with_default("call_tool")
});

/// A value that can be decoded from the wire as an environment action
///
/// Plain domain actions implement `decode` with [`decode_plain`]; discriminated
/// unions route through a [`UnionDecoder`].
pub trait WireAction: Sized + Send + 'static {
    /// Decode and validate a raw wire payload
    fn decode(raw: serde_json::Value) -> Result<Self, SchemaError>;

    /// Hand reserved MCP actions back to the runtime
    fn into_mcp(self) -> Result<McpAction, Self> {
        Err(self)
    }
}

impl WireAction for McpAction {
    fn decode(raw: serde_json::Value) -> Result<Self, SchemaError> {
        MCP_ACTIONS.decode(raw)
    }

    fn into_mcp(self) -> Result<McpAction, Self> {
        Ok(self)
    }
}

/// Opaque domain actions passed through untouched
impl WireAction for serde_json::Value {
    fn decode(raw: serde_json::Value) -> Result<Self, SchemaError> {
        Ok(raw)
    }
}
