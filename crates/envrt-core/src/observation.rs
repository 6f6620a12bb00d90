//! Observation types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::tool::{Tool, ToolError};

/// Fields every observation carries
///
/// Domain observations embed this with `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObservationBase {
    /// Episode terminated
    pub done: bool,
    /// Scalar reward for the last transition
    pub reward: Option<f64>,
    /// Free-form observation metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ObservationBase {
    pub fn new(done: bool, reward: Option<f64>) -> Self {
        Self {
            done,
            reward,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Result of a `list_tools` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListToolsObservation {
    pub tools: Vec<Tool>,
    #[serde(flatten)]
    pub base: ObservationBase,
}

/// Result of a `call_tool` action
///
/// Failures of the tool's own domain logic travel inside `result`; `error`
/// is reserved for framework failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallToolObservation {
    pub tool_name: String,
    #[serde(default)]
    pub result: serde_json::Value,
    pub error: Option<ToolError>,
    #[serde(flatten)]
    pub base: ObservationBase,
}

impl CallToolObservation {
    pub fn success(tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            result,
            error: None,
            base: ObservationBase::default(),
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: ToolError) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: serde_json::Value::Null,
            error: Some(error),
            base: ObservationBase::default(),
        }
    }
}

/// Wire shape of a reset/step response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Domain observation fields (plus non-empty metadata)
    pub observation: serde_json::Value,
    pub reward: Option<f64>,
    pub done: bool,
}

impl StepResponse {
    /// Parse the observation body as a typed domain observation
    pub fn observation_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, SchemaError> {
        serde_json::from_value(self.observation.clone()).map_err(SchemaError::from)
    }
}
