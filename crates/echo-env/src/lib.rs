//! Echo environment for envrt
//!
//! Every step echoes a message back and rewards its length. Two tools are
//! exposed over MCP: `echo` and `add`.

use async_trait::async_trait;
use envrt_core::action::CallToolAction;
use envrt_core::{
    EnvError, EnvironmentMetadata, McpAction, ObservationBase, ResetArgs, Result, SchemaError,
    StateBase, Tool, ToolError, UnionDecoder, WireAction, decode_plain,
};
use envrt_server::{BoxError, Environment, FactoryArgs};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Episode length when the factory is given no `max_steps`
pub const DEFAULT_MAX_STEPS: u64 = 100;

/// Reward per echoed character
const REWARD_PER_CHAR: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EchoMessage {
    pub message: String,
}

/// Actions understood by [`EchoEnvironment`]
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum EchoAction {
    /// `{"type": "message", "message": ...}`
    Message(EchoMessage),
    Mcp(McpAction),
}

static ECHO_ACTIONS: LazyLock<UnionDecoder<EchoAction>> = LazyLock::new(|| {
    UnionDecoder::new("type")
        .variant("message", |f| decode_plain(f).map(EchoAction::Message))
        .variant("list_tools", |_| Ok(EchoAction::Mcp(McpAction::ListTools)))
        .variant("call_tool", |f| {
            decode_plain::<CallToolAction>(f).map(|c| EchoAction::Mcp(McpAction::CallTool(c)))
        })
});

impl WireAction for EchoAction {
    fn decode(raw: serde_json::Value) -> std::result::Result<Self, SchemaError> {
        ECHO_ACTIONS.decode(raw)
    }

    fn into_mcp(self) -> std::result::Result<McpAction, Self> {
        match self {
            EchoAction::Mcp(action) => Ok(action),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct EchoObservation {
    pub echoed_message: String,
    pub message_length: usize,
    #[serde(flatten)]
    pub base: ObservationBase,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct EchoState {
    pub message_count: u64,
    pub last_message: Option<String>,
    pub max_steps: u64,
    #[serde(flatten)]
    pub base: StateBase,
}

/// Arguments of the `echo` tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// Text to send back
    pub message: String,
}

/// Arguments of the `add` tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddArgs {
    pub a: f64,
    pub b: f64,
}

pub struct EchoEnvironment {
    max_steps: u64,
    episode_id: Option<String>,
    steps: u64,
    last_message: Option<String>,
}

impl EchoEnvironment {
    pub fn new(max_steps: u64) -> Self {
        Self {
            max_steps,
            episode_id: None,
            steps: 0,
            last_message: None,
        }
    }

    fn observe(&self, message: String, reward: Option<f64>) -> EchoObservation {
        EchoObservation {
            message_length: message.chars().count(),
            echoed_message: message,
            base: ObservationBase::new(self.steps >= self.max_steps, reward),
        }
    }
}

impl Default for EchoEnvironment {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

fn tool_args<T: serde::de::DeserializeOwned>(
    arguments: serde_json::Map<String, serde_json::Value>,
) -> std::result::Result<T, ToolError> {
    decode_plain(serde_json::Value::Object(arguments)).map_err(|e| ToolError::invalid_args(e.to_string()))
}

#[async_trait]
impl Environment for EchoEnvironment {
    type Action = EchoAction;
    type Observation = EchoObservation;
    type State = EchoState;

    async fn reset(&mut self, args: ResetArgs) -> Result<EchoObservation> {
        self.steps = 0;
        self.last_message = None;
        self.episode_id = args.episode_id;
        tracing::debug!("Echo episode {:?} started", self.episode_id);
        Ok(self.observe(String::new(), Some(0.0)))
    }

    async fn step(&mut self, action: EchoAction) -> Result<EchoObservation> {
        match action {
            EchoAction::Message(EchoMessage { message }) => {
                self.steps += 1;
                self.last_message = Some(message.clone());
                let reward = message.chars().count() as f64 * REWARD_PER_CHAR;
                Ok(self.observe(message, Some(reward)))
            }
            EchoAction::Mcp(_) => Err(EnvError::Environment(
                "MCP actions are answered by the runtime".into(),
            )),
        }
    }

    fn state(&self) -> EchoState {
        EchoState {
            message_count: self.steps,
            last_message: self.last_message.clone(),
            max_steps: self.max_steps,
            base: StateBase {
                episode_id: self.episode_id.clone(),
                step_count: self.steps,
            },
        }
    }

    fn tools(&self) -> Vec<Tool> {
        [
            Tool::new(
                "echo",
                "Echo a message back",
                schemars::schema_for!(EchoArgs).to_value(),
            ),
            Tool::new(
                "add",
                "Add two numbers",
                schemars::schema_for!(AddArgs).to_value(),
            ),
        ]
        .into_iter()
        .filter_map(std::result::Result::ok)
        .collect()
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        match name {
            "echo" => {
                let args: EchoArgs = tool_args(arguments)?;
                Ok(serde_json::Value::String(args.message))
            }
            "add" => {
                let args: AddArgs = tool_args(arguments)?;
                Ok(serde_json::json!(args.a + args.b))
            }
            other => Err(ToolError::not_found(other)),
        }
    }

    fn metadata() -> EnvironmentMetadata {
        EnvironmentMetadata::new("echo-env", "Echoes messages back and rewards their length")
            .with_version(env!("CARGO_PKG_VERSION"))
    }
}

/// Factory accepting an optional positive integer `max_steps`
pub fn echo_factory(args: FactoryArgs) -> std::result::Result<EchoEnvironment, BoxError> {
    let max_steps = match args.get("max_steps") {
        None | Some(serde_json::Value::Null) => DEFAULT_MAX_STEPS,
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => n,
            _ => return Err(format!("max_steps must be a positive integer, got {}", value).into()),
        },
    };
    Ok(EchoEnvironment::new(max_steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use envrt_server::{Dispatcher, EnvironmentFactory, ServerConfig, SessionBinding};
    use serde_json::json;

    fn dispatcher() -> Dispatcher<impl EnvironmentFactory<Env = EchoEnvironment>> {
        Dispatcher::new(echo_factory, ServerConfig::default()).unwrap()
    }

    #[test]
    fn test_action_union() {
        assert!(matches!(
            EchoAction::decode(json!({"type": "message", "message": "hi"})).unwrap(),
            EchoAction::Message(m) if m.message == "hi"
        ));
        assert!(matches!(
            EchoAction::decode(json!({"type": "list_tools"})).unwrap(),
            EchoAction::Mcp(McpAction::ListTools)
        ));
        // the missing-tag default belongs to the MCP union only
        assert!(EchoAction::decode(json!({"message": "hi"})).is_err());
        assert!(EchoAction::decode(json!({"type": "shout", "message": "hi"})).is_err());
    }

    #[test]
    fn test_factory_validates_max_steps() {
        let mut args = FactoryArgs::new();
        assert_eq!(echo_factory(args.clone()).unwrap().max_steps, DEFAULT_MAX_STEPS);
        args.insert("max_steps".into(), json!(2));
        assert_eq!(echo_factory(args.clone()).unwrap().max_steps, 2);
        args.insert("max_steps".into(), json!(0));
        assert!(echo_factory(args.clone()).is_err());
        args.insert("max_steps".into(), json!("many"));
        assert!(echo_factory(args).is_err());
    }

    #[tokio::test]
    async fn test_episode_through_dispatcher() {
        let d = dispatcher();
        let binding = SessionBinding::Implicit;

        let reset = d
            .reset(&binding, json!({"episode_id": "ep-1"}))
            .await
            .unwrap();
        assert_eq!(reset["done"], false);
        assert_eq!(reset["observation"]["echoed_message"], "");

        let step = d
            .step(&binding, json!({"type": "message", "message": "hello"}), None)
            .await
            .unwrap();
        assert_eq!(step["observation"]["echoed_message"], "hello");
        assert_eq!(step["observation"]["message_length"], 5);
        assert!((step["reward"].as_f64().unwrap() - 0.5).abs() < 1e-9);

        let state = d.state(&binding).await.unwrap();
        assert_eq!(state["episode_id"], "ep-1");
        assert_eq!(state["step_count"], 1);
        assert_eq!(state["last_message"], "hello");
    }

    #[tokio::test]
    async fn test_episode_ends_at_max_steps() {
        let mut env = EchoEnvironment::new(2);
        env.reset(ResetArgs::default()).await.unwrap();
        let first = env
            .step(EchoAction::Message(EchoMessage { message: "a".into() }))
            .await
            .unwrap();
        assert!(!first.base.done);
        let second = env
            .step(EchoAction::Message(EchoMessage { message: "b".into() }))
            .await
            .unwrap();
        assert!(second.base.done);
    }

    #[tokio::test]
    async fn test_tools() {
        let mut env = EchoEnvironment::default();
        let names: Vec<_> = env.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "add"]);

        let mut args = serde_json::Map::new();
        args.insert("message".into(), json!("ping"));
        assert_eq!(env.call_tool("echo", args).await.unwrap(), "ping");

        let mut args = serde_json::Map::new();
        args.insert("a".into(), json!(2));
        args.insert("b".into(), json!(3.5));
        assert_eq!(env.call_tool("add", args).await.unwrap(), 5.5);

        let err = env.call_tool("add", serde_json::Map::new()).await.unwrap_err();
        assert_eq!(err.error_type, envrt_core::ToolErrorType::InvalidArgs);
    }

    #[tokio::test]
    async fn test_tools_list_via_mcp_action_without_reset() {
        let d = dispatcher();
        let obs = d
            .step(&SessionBinding::Implicit, json!({"type": "list_tools"}), None)
            .await
            .unwrap();
        let tools = obs["observation"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
    }
}
