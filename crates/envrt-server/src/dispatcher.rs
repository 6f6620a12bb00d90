//! Transport-agnostic request dispatch
//!
//! Every transport resolves its session binding and hands the raw payload
//! here; decoding, session lookup, deadlines and observation encoding all
//! happen in one place so HTTP, WebSocket and MCP behave identically.

use envrt_core::{
    CallToolObservation, EnvError, EnvironmentMetadata, ListToolsObservation, McpAction,
    ObservationBase, ResetArgs, Result, Tool, ToolError, ToolErrorType, WireAction,
    decode_action, decode_plain, encode_observation, is_reserved_tool_name,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::capacity::CapacityStatus;
use crate::config::ServerConfig;
use crate::environment::{Environment, EnvironmentFactory, FactoryArgs};
use crate::manager::SessionManager;
use crate::session::{Session, SessionId, SessionInfo};

/// How a request names its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBinding {
    /// A session id carried by the request
    Explicit(SessionId),
    /// The shared default session, created on first use
    Implicit,
}

/// HTTP `/step` body
#[derive(Debug, Clone, Deserialize)]
pub struct StepRequest {
    pub action: serde_json::Value,
    /// Per-request deadline in seconds
    #[serde(default)]
    pub timeout_s: Option<f64>,
}

impl StepRequest {
    pub fn timeout(&self) -> Result<Option<Duration>> {
        let Some(secs) = self.timeout_s else {
            return Ok(None);
        };
        match Duration::try_from_secs_f64(secs) {
            Ok(limit) if !limit.is_zero() => Ok(Some(limit)),
            _ => Err(envrt_core::SchemaError::invalid(
                "timeout_s",
                format!("expected a positive number of seconds, got {}", secs),
            )
            .into()),
        }
    }
}

/// Shared runtime state, built once at startup
pub struct RuntimeContext<F: EnvironmentFactory> {
    pub config: ServerConfig,
    pub manager: Arc<SessionManager<F>>,
}

impl<F: EnvironmentFactory> RuntimeContext<F> {
    pub fn new(factory: F, config: ServerConfig) -> Result<Self> {
        let manager = Arc::new(SessionManager::new(factory, &config)?);
        Ok(Self { config, manager })
    }
}

/// Routes decoded operations to sessions
pub struct Dispatcher<F: EnvironmentFactory> {
    manager: Arc<SessionManager<F>>,
    config: ServerConfig,
    implicit: Mutex<Option<SessionId>>,
}

type EnvAction<F> = <<F as EnvironmentFactory>::Env as Environment>::Action;

impl<F: EnvironmentFactory> Dispatcher<F> {
    pub fn new(factory: F, config: ServerConfig) -> Result<Self> {
        Ok(Self::from_context(RuntimeContext::new(factory, config)?))
    }

    pub fn from_context(ctx: RuntimeContext<F>) -> Self {
        Self {
            manager: ctx.manager,
            config: ctx.config,
            implicit: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager<F>> {
        &self.manager
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn capacity(&self) -> CapacityStatus {
        self.manager.capacity()
    }

    pub fn metadata(&self) -> EnvironmentMetadata {
        <F::Env as Environment>::metadata()
    }

    /// JSON schemas for the action, observation and state types
    pub fn schema(&self) -> serde_json::Value {
        let action = schemars::schema_for!(EnvAction<F>);
        let observation = schemars::schema_for!(<F::Env as Environment>::Observation);
        let state = schemars::schema_for!(<F::Env as Environment>::State);
        serde_json::json!({
            "action": action,
            "observation": observation,
            "state": state,
        })
    }

    pub async fn create_session(&self, args: FactoryArgs) -> Result<SessionId> {
        let session = self.manager.create(args).await?;
        Ok(session.id().to_string())
    }

    pub async fn close_session(&self, id: &str) -> bool {
        self.manager.destroy(id).await
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.manager.list().await
    }

    async fn resolve(&self, binding: &SessionBinding) -> Result<Arc<Session<F::Env>>> {
        match binding {
            SessionBinding::Explicit(id) => self.manager.get(id).await,
            SessionBinding::Implicit => {
                if !self.config.implicit_session {
                    return Err(EnvError::SessionNotFound(
                        "no session id supplied and implicit sessions are disabled".into(),
                    ));
                }
                let mut implicit = self.implicit.lock().await;
                if let Some(id) = implicit.as_ref() {
                    match self.manager.get(id).await {
                        Ok(session) => return Ok(session),
                        Err(_) => tracing::debug!("Implicit session {} is gone, recreating", id),
                    }
                }
                let session = self.manager.create(FactoryArgs::new()).await?;
                *implicit = Some(session.id().to_string());
                Ok(session)
            }
        }
    }

    /// Start a new episode; `null` means default reset arguments
    pub async fn reset(&self, binding: &SessionBinding, raw: serde_json::Value) -> Result<serde_json::Value> {
        let args: ResetArgs = if raw.is_null() {
            ResetArgs::default()
        } else {
            decode_plain(raw)?
        };
        let session = self.resolve(binding).await?;
        let mut slot = session.acquire().await?;
        let obs = with_deadline(self.config.step_timeout, slot.env_mut().reset(args)).await?;
        slot.reset_steps();
        Ok(encode_observation(&obs)?)
    }

    /// Decode and apply one action
    ///
    /// Reserved MCP actions are answered by the runtime and never reach the
    /// environment's `step`.
    pub async fn step(
        &self,
        binding: &SessionBinding,
        raw: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let action = decode_action::<EnvAction<F>>(raw).map_err(|e| e.within("action"))?;
        let session = self.resolve(binding).await?;
        let mut slot = session.acquire().await?;

        match action.into_mcp() {
            Ok(McpAction::ListTools) => Ok(encode_observation(&ListToolsObservation {
                tools: visible_tools(slot.env()),
                base: ObservationBase::new(false, None),
            })?),
            Ok(McpAction::CallTool(call)) => {
                let obs = self
                    .invoke_tool(slot.env_mut(), &call.tool_name, call.arguments)
                    .await;
                Ok(encode_observation(&obs)?)
            }
            Err(action) => {
                let deadline = timeout.or(self.config.step_timeout);
                let obs = with_deadline(deadline, slot.env_mut().step(action)).await?;
                slot.record_step();
                Ok(encode_observation(&obs)?)
            }
        }
    }

    pub async fn state(&self, binding: &SessionBinding) -> Result<serde_json::Value> {
        let session = self.resolve(binding).await?;
        let slot = session.acquire().await?;
        Ok(serde_json::to_value(slot.env().state())?)
    }

    /// Tools of a session's environment, or of a scratch instance when unbound
    pub async fn list_tools(&self, binding: Option<&SessionBinding>) -> Result<Vec<Tool>> {
        match binding {
            Some(binding) => {
                let session = self.resolve(binding).await?;
                let slot = session.acquire().await?;
                Ok(visible_tools(slot.env()))
            }
            None => {
                let scratch = self.manager.scratch(FactoryArgs::new()).await?;
                let tools = visible_tools(scratch.env());
                self.manager.discard(scratch).await;
                Ok(tools)
            }
        }
    }

    /// Invoke a tool; tool failures come back in-band on the observation
    pub async fn call_tool(
        &self,
        binding: Option<&SessionBinding>,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolObservation> {
        if is_reserved_tool_name(name) {
            return Ok(CallToolObservation::failure(name, ToolError::reserved(name)));
        }
        match binding {
            Some(binding) => {
                let session = self.resolve(binding).await?;
                let mut slot = session.acquire().await?;
                Ok(self.invoke_tool(slot.env_mut(), name, arguments).await)
            }
            None => {
                let mut scratch = self.manager.scratch(FactoryArgs::new()).await?;
                let obs = self.invoke_tool(scratch.env_mut(), name, arguments).await;
                self.manager.discard(scratch).await;
                Ok(obs)
            }
        }
    }

    async fn invoke_tool(
        &self,
        env: &mut F::Env,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> CallToolObservation {
        if is_reserved_tool_name(name) {
            return CallToolObservation::failure(name, ToolError::reserved(name));
        }
        if !env.tools().iter().any(|tool| tool.name == name) {
            return CallToolObservation::failure(name, ToolError::not_found(name));
        }

        let call = env.call_tool(name, arguments);
        let outcome = match self.config.tool_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::new(
                    ToolErrorType::Timeout,
                    format!("Tool `{}` timed out after {:?}", name, limit),
                )),
            },
            None => call.await,
        };

        match outcome {
            Ok(result) => CallToolObservation::success(name, result),
            Err(e) => {
                tracing::debug!("Tool {} failed: {}", name, e);
                CallToolObservation::failure(name, e)
            }
        }
    }
}

/// Environment tools minus any that shadow an operation name
fn visible_tools<E: Environment>(env: &E) -> Vec<Tool> {
    env.tools()
        .into_iter()
        .filter(|tool| {
            let reserved = is_reserved_tool_name(&tool.name);
            if reserved {
                tracing::warn!("Hiding tool `{}`: name is reserved", tool.name);
            }
            !reserved
        })
        .collect()
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| EnvError::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CounterEnv, counter_factory};
    use envrt_core::SchemaErrorKind;
    use serde_json::json;

    fn dispatcher(config: ServerConfig) -> Dispatcher<impl EnvironmentFactory<Env = CounterEnv>> {
        Dispatcher::new(counter_factory, config).unwrap()
    }

    #[tokio::test]
    async fn test_reset_then_step_preserves_reward_and_done() {
        let d = dispatcher(ServerConfig::default());
        let binding = SessionBinding::Implicit;

        let reset = d.reset(&binding, json!({"seed": 7})).await.unwrap();
        assert_eq!(reset["observation"]["count"], 0);
        assert_eq!(reset["done"], false);

        let step = d
            .step(&binding, json!({"type": "increment", "by": 10}), None)
            .await
            .unwrap();
        assert_eq!(step["observation"]["count"], 10);
        assert_eq!(step["reward"], 10.0);
        assert_eq!(step["done"], true);

        let state = d.state(&binding).await.unwrap();
        assert_eq!(state["count"], 10);
        assert_eq!(state["step_count"], 1);
    }

    #[tokio::test]
    async fn test_invalid_action_is_schema_error_without_mutation() {
        let d = dispatcher(ServerConfig::default());
        let binding = SessionBinding::Implicit;
        d.reset(&binding, json!(null)).await.unwrap();

        let err = d
            .step(&binding, json!({"type": "increment"}), None)
            .await
            .unwrap_err();
        match err {
            EnvError::Schema(schema) => {
                assert_eq!(schema.kind, SchemaErrorKind::MissingField);
                assert_eq!(schema.path, "action.by");
            }
            other => panic!("expected schema error, got {}", other),
        }
        assert_eq!(d.state(&binding).await.unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn test_explicit_unknown_session() {
        let d = dispatcher(ServerConfig::default());
        let err = d
            .state(&SessionBinding::Explicit("nope".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_implicit_disabled() {
        let d = dispatcher(ServerConfig::default().with_implicit_session(false));
        let err = d.reset(&SessionBinding::Implicit, json!(null)).await.unwrap_err();
        assert!(matches!(err, EnvError::SessionNotFound(_)));
        assert_eq!(d.capacity().current_sessions, 0);
    }

    #[tokio::test]
    async fn test_list_tools_hides_reserved_without_reset() {
        let d = dispatcher(ServerConfig::default());
        let tools = d.list_tools(None).await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "slow"]);
        // the scratch slot is released once the call returns
        assert_eq!(d.capacity().current_sessions, 0);
    }

    #[tokio::test]
    async fn test_reserved_tool_names_rejected_in_band() {
        let d = dispatcher(ServerConfig::default());
        for name in ["reset", "step", "state", "close"] {
            let obs = d.call_tool(None, name, Default::default()).await.unwrap();
            let err = obs.error.expect("reserved call must fail");
            assert_eq!(err.error_type, ToolErrorType::InvalidArgs);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_and_tool_failure_are_distinct() {
        let d = dispatcher(ServerConfig::default());
        let binding = SessionBinding::Implicit;

        let missing = d.call_tool(Some(&binding), "nope", Default::default()).await.unwrap();
        assert_eq!(missing.error.unwrap().error_type, ToolErrorType::ToolNotFound);

        let bad_args = d.call_tool(Some(&binding), "add", Default::default()).await.unwrap();
        assert_eq!(bad_args.error.unwrap().error_type, ToolErrorType::InvalidArgs);

        let args = json!({"a": 2, "b": 3}).as_object().cloned().unwrap();
        let ok = d.call_tool(Some(&binding), "add", args).await.unwrap();
        assert!(ok.error.is_none());
        assert_eq!(ok.result, json!(5));
    }

    #[tokio::test]
    async fn test_mcp_actions_through_step() {
        let d = dispatcher(ServerConfig::default());
        let binding = SessionBinding::Implicit;

        let listed = d.step(&binding, json!({"type": "list_tools"}), None).await.unwrap();
        assert_eq!(listed["observation"]["tools"].as_array().unwrap().len(), 2);

        let called = d
            .step(
                &binding,
                json!({"type": "call_tool", "tool_name": "add", "arguments": {"a": 1, "b": 1}}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(called["observation"]["result"], 2);
        // MCP actions do not advance the episode
        assert_eq!(d.state(&binding).await.unwrap()["step_count"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_from_request() {
        let d = dispatcher(ServerConfig::default());
        let binding = SessionBinding::Implicit;
        let err = d
            .step(
                &binding,
                json!({"type": "sleep", "ms": 5000}),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Timeout(limit) if limit == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_reported_in_band() {
        let d = dispatcher(ServerConfig::default().with_tool_timeout(Some(Duration::from_secs(2))));
        let obs = d.call_tool(None, "slow", Default::default()).await.unwrap();
        assert_eq!(obs.error.unwrap().error_type, ToolErrorType::Timeout);
    }

    #[test]
    fn test_step_request_timeout_validation() {
        let req: StepRequest = serde_json::from_value(json!({"action": {}, "timeout_s": 1.5})).unwrap();
        assert_eq!(req.timeout().unwrap(), Some(Duration::from_millis(1500)));
        for secs in [json!(-1), json!(0), json!(1e300)] {
            let bad: StepRequest =
                serde_json::from_value(json!({"action": {}, "timeout_s": secs})).unwrap();
            assert!(matches!(bad.timeout(), Err(EnvError::Schema(ref e)) if e.path == "timeout_s"));
        }
    }

    #[test]
    fn test_schema_lists_all_three_types() {
        let d = dispatcher(ServerConfig::default());
        let schema = d.schema();
        assert!(schema["action"].is_object());
        assert!(schema["observation"].is_object());
        assert!(schema["state"].is_object());
    }
}
