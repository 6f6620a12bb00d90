//! Counter environment used by the unit tests

use async_trait::async_trait;
use envrt_core::action::CallToolAction;
use envrt_core::{
    EnvError, McpAction, ObservationBase, ResetArgs, Result, SchemaError, StateBase, Tool,
    ToolError, UnionDecoder, WireAction, decode_plain,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::environment::{BoxError, Environment, FactoryArgs};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Increment {
    pub by: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Sleep {
    pub ms: u64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum CounterAction {
    Increment(Increment),
    Sleep(Sleep),
    Mcp(McpAction),
}

static COUNTER_ACTIONS: LazyLock<UnionDecoder<CounterAction>> = LazyLock::new(|| {
    UnionDecoder::new("type")
        .variant("increment", |f| decode_plain(f).map(CounterAction::Increment))
        .variant("sleep", |f| decode_plain(f).map(CounterAction::Sleep))
        .variant("list_tools", |_| Ok(CounterAction::Mcp(McpAction::ListTools)))
        .variant("call_tool", |f| {
            decode_plain::<CallToolAction>(f).map(|c| CounterAction::Mcp(McpAction::CallTool(c)))
        })
});

impl WireAction for CounterAction {
    fn decode(raw: serde_json::Value) -> std::result::Result<Self, SchemaError> {
        COUNTER_ACTIONS.decode(raw)
    }

    fn into_mcp(self) -> std::result::Result<McpAction, Self> {
        match self {
            CounterAction::Mcp(action) => Ok(action),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CounterObservation {
    pub count: i64,
    #[serde(flatten)]
    pub base: ObservationBase,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CounterState {
    pub count: i64,
    #[serde(flatten)]
    pub base: StateBase,
}

#[derive(Default)]
pub struct CounterEnv {
    pub count: i64,
    pub episode_id: Option<String>,
    pub steps: u64,
    pub closed: Option<Arc<AtomicUsize>>,
}

impl CounterEnv {
    pub fn tracking(closed: Arc<AtomicUsize>) -> Self {
        Self {
            closed: Some(closed),
            ..Default::default()
        }
    }

    fn observe(&self, reward: f64) -> CounterObservation {
        CounterObservation {
            count: self.count,
            base: ObservationBase::new(self.count >= 10, Some(reward)),
        }
    }
}

#[async_trait]
impl Environment for CounterEnv {
    type Action = CounterAction;
    type Observation = CounterObservation;
    type State = CounterState;

    async fn reset(&mut self, args: ResetArgs) -> Result<CounterObservation> {
        self.count = 0;
        self.steps = 0;
        self.episode_id = args.episode_id;
        Ok(self.observe(0.0))
    }

    async fn step(&mut self, action: CounterAction) -> Result<CounterObservation> {
        match action {
            CounterAction::Increment(Increment { by }) => {
                self.count += by;
                self.steps += 1;
                Ok(self.observe(by as f64))
            }
            CounterAction::Sleep(Sleep { ms }) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(self.observe(0.0))
            }
            CounterAction::Mcp(_) => Err(EnvError::Environment(
                "MCP actions are handled by the runtime".into(),
            )),
        }
    }

    fn state(&self) -> CounterState {
        CounterState {
            count: self.count,
            base: StateBase {
                episode_id: self.episode_id.clone(),
                step_count: self.steps,
            },
        }
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                "add",
                "Add two integers",
                json!({"type": "object", "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}}),
            )
            .expect("valid tool"),
            Tool::new("slow", "Never finishes quickly", json!({"type": "object"}))
                .expect("valid tool"),
            // collides with an operation; the runtime must hide it
            Tool {
                name: "reset".into(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
                output_schema: None,
            },
        ]
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        match name {
            "add" => {
                let a = arguments.get("a").and_then(|v| v.as_i64());
                let b = arguments.get("b").and_then(|v| v.as_i64());
                match (a, b) {
                    (Some(a), Some(b)) => Ok(json!(a + b)),
                    _ => Err(ToolError::invalid_args("`a` and `b` must be integers")),
                }
            }
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            }
            other => Err(ToolError::not_found(other)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(closed) = &self.closed {
            closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn counter_factory(_args: FactoryArgs) -> std::result::Result<CounterEnv, BoxError> {
    Ok(CounterEnv::default())
}
