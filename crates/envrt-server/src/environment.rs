//! Environment and factory traits

use async_trait::async_trait;
use envrt_core::{EnvironmentMetadata, ResetArgs, Result, Tool, ToolError, WireAction};
use schemars::JsonSchema;
use serde::Serialize;

/// Arguments handed to the factory when a session is created
pub type FactoryArgs = serde_json::Map<String, serde_json::Value>;

/// Boxed error returned by environment factories
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for implementing environments
///
/// Implement this trait to expose a simulation through the runtime. Every
/// session owns exactly one instance; calls on an instance never overlap.
#[async_trait]
pub trait Environment: Send + 'static {
    /// Declared action type, decoded through the schema codec
    type Action: WireAction + JsonSchema;
    /// Observation returned from `reset` and `step`
    type Observation: Serialize + JsonSchema + Send;
    /// Snapshot returned from `state`
    type State: Serialize + JsonSchema + Send;

    /// Start a new episode
    async fn reset(&mut self, args: ResetArgs) -> Result<Self::Observation>;

    /// Apply an action and advance the simulation
    async fn step(&mut self, action: Self::Action) -> Result<Self::Observation>;

    /// Current episode state
    fn state(&self) -> Self::State;

    /// Tools this instance exposes for MCP invocation
    fn tools(&self) -> Vec<Tool> {
        Vec::new()
    }

    /// Invoke a tool by name
    ///
    /// Only called for names listed by [`Environment::tools`].
    async fn call_tool(
        &mut self,
        name: &str,
        _arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        Err(ToolError::not_found(name))
    }

    /// Release resources held by this instance
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Metadata served from `GET /metadata`
    fn metadata() -> EnvironmentMetadata
    where
        Self: Sized,
    {
        EnvironmentMetadata::new(std::any::type_name::<Self>(), "")
    }
}

/// Builds environment instances for new sessions
#[async_trait]
pub trait EnvironmentFactory: Send + Sync + 'static {
    type Env: Environment;

    async fn create(&self, args: FactoryArgs) -> std::result::Result<Self::Env, BoxError>;
}

#[async_trait]
impl<E, F> EnvironmentFactory for F
where
    E: Environment,
    F: Fn(FactoryArgs) -> std::result::Result<E, BoxError> + Send + Sync + 'static,
{
    type Env = E;

    async fn create(&self, args: FactoryArgs) -> std::result::Result<E, BoxError> {
        (self)(args)
    }
}
