//! Environment metadata

use serde::{Deserialize, Serialize};

/// Descriptive metadata served from `GET /metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentMetadata {
    /// Environment name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Environment version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Runtime protocol version
    pub envrt_version: String,
    /// Additional environment-specific fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EnvironmentMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl Default for EnvironmentMetadata {
    fn default() -> Self {
        Self {
            name: "Unknown".into(),
            description: String::new(),
            version: None,
            envrt_version: env!("CARGO_PKG_VERSION").into(),
            extra: serde_json::Map::new(),
        }
    }
}
