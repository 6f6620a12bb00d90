//! # envrt-core
//!
//! Core wire types for the envrt environment runtime.
//!
//! This crate provides the types shared by servers and clients:
//! - Actions, including the reserved MCP `list_tools`/`call_tool` union
//! - Observations and the step response wire shape
//! - Tool descriptors and tool-level errors
//! - The schema codec
//! - JSON-RPC envelopes and MCP payloads

pub mod action;
pub mod codec;
pub mod error;
pub mod jsonrpc;
pub mod manifest;
pub mod mcp;
pub mod observation;
pub mod state;
pub mod tool;

pub use action::{CallToolAction, McpAction, WireAction};
pub use codec::{UnionDecoder, decode_action, decode_plain, encode_observation};
pub use error::{EnvError, Result, SchemaError, SchemaErrorKind, error_codes};
pub use manifest::EnvironmentMetadata;
pub use observation::{CallToolObservation, ListToolsObservation, ObservationBase, StepResponse};
pub use state::{ResetArgs, StateBase};
pub use tool::{RESERVED_TOOL_NAMES, Tool, ToolError, ToolErrorType, is_reserved_tool_name};
