//! Episode state and reset arguments

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Arguments accepted by `reset`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResetArgs {
    /// Random seed for reproducibility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Caller-chosen episode identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    /// Environment-specific reset options
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResetArgs {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }
}

/// Fields every environment state carries
///
/// Domain state types embed this with `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StateBase {
    pub episode_id: Option<String>,
    pub step_count: u64,
}
