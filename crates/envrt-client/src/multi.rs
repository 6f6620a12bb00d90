//! Tool client spanning several MCP endpoints
//!
//! Tools are routed to the first endpoint that reports them. Ownership is
//! cached and never invalidated; concurrent callers may probe redundantly but
//! always agree on the first owner recorded.

use envrt_core::{Tool, ToolError, ToolErrorType};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::mcp::McpEndpoint;

/// Retry behaviour for transient endpoint failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay after the zero-based `attempt` failed: `base * 2^attempt`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Last failure seen from one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub message: String,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.message)
    }
}

fn format_failures(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from [`MultiEndpointToolClient`]
#[derive(Debug, Error)]
pub enum ToolClientError {
    #[error("No endpoints configured")]
    NoEndpoints,

    /// Every endpoint answered and none has the tool; never retried
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("No endpoint reported any tools")]
    NoTools,

    /// Transient failures persisted through every attempt
    #[error("All {attempts} attempts failed: {}", format_failures(.failures))]
    Exhausted {
        attempts: u32,
        failures: Vec<EndpointFailure>,
    },

    /// The tool ran and reported a failure
    #[error(transparent)]
    Tool(ToolError),

    /// Non-transient endpoint failure
    #[error("Endpoint {endpoint} failed: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: ClientError,
    },
}

type Failures = BTreeMap<usize, EndpointFailure>;

/// Outcome of one attempt
enum Attempt {
    Retry,
    Fail(ToolClientError),
}

enum Probe {
    Found(usize),
    Missing,
    Unreachable,
}

/// Routes tool calls across endpoints with owner caching and retry
pub struct MultiEndpointToolClient {
    endpoints: Vec<Arc<dyn McpEndpoint>>,
    owners: RwLock<HashMap<String, usize>>,
    retry: RetryConfig,
}

impl MultiEndpointToolClient {
    pub fn new(endpoints: Vec<Arc<dyn McpEndpoint>>) -> Self {
        Self {
            endpoints,
            owners: RwLock::new(HashMap::new()),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Name of the endpoint cached as owner of `tool`
    pub async fn owner_of(&self, tool: &str) -> Option<String> {
        let owners = self.owners.read().await;
        owners
            .get(tool)
            .map(|&index| self.endpoints[index].name().to_string())
    }

    /// Union of every endpoint's tools, first reporter wins
    ///
    /// A pass where every endpoint fails transiently is retried with backoff.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, ToolClientError> {
        if self.endpoints.is_empty() {
            return Err(ToolClientError::NoEndpoints);
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut failures = Failures::new();
        for attempt in 0..attempts {
            match self.list_pass(&mut failures).await {
                Ok(tools) if tools.is_empty() => return Err(ToolClientError::NoTools),
                Ok(tools) => return Ok(tools),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry) => {}
            }
            if attempt + 1 < attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(
                    "Listing tools attempt {}/{} failed on every endpoint; retrying in {:?}",
                    attempt + 1,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(ToolClientError::Exhausted {
            attempts,
            failures: failures.into_values().collect(),
        })
    }

    /// One concurrent listing of every endpoint
    async fn list_pass(&self, failures: &mut Failures) -> Result<Vec<Tool>, Attempt> {
        let listings =
            futures::future::join_all(self.endpoints.iter().map(|endpoint| endpoint.list_tools()))
                .await;

        let mut tools: Vec<Tool> = Vec::new();
        let mut answered = false;
        let mut transient = false;
        let mut permanent = None;
        for (index, listing) in listings.into_iter().enumerate() {
            let endpoint = &self.endpoints[index];
            match listing {
                Ok(listed) => {
                    answered = true;
                    self.remember(index, &listed).await;
                    for tool in listed {
                        if !tools.iter().any(|t| t.name == tool.name) {
                            tools.push(tool);
                        }
                    }
                }
                Err(e) => {
                    warn!("Listing tools on {} failed: {}", endpoint.name(), e);
                    record(failures, index, &**endpoint, &e);
                    if e.is_transient() {
                        transient = true;
                    } else if permanent.is_none() {
                        permanent = Some((endpoint.name().to_string(), e));
                    }
                }
            }
        }

        if answered {
            return Ok(tools);
        }
        match permanent {
            Some((endpoint, source)) if !transient => {
                Err(Attempt::Fail(ToolClientError::Endpoint { endpoint, source }))
            }
            _ => Err(Attempt::Retry),
        }
    }

    /// Call `name` on whichever endpoint owns it
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolClientError> {
        if self.endpoints.is_empty() {
            return Err(ToolClientError::NoEndpoints);
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut failures = Failures::new();
        for attempt in 0..attempts {
            match self.attempt(name, &arguments, &mut failures).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("Tool {} succeeded on attempt {}", name, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry) => {}
            }
            if attempt + 1 < attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(
                    "Tool {} attempt {}/{} failed; retrying in {:?}",
                    name,
                    attempt + 1,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(ToolClientError::Exhausted {
            attempts,
            failures: failures.into_values().collect(),
        })
    }

    async fn attempt(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        failures: &mut Failures,
    ) -> Result<serde_json::Value, Attempt> {
        let cached = self.owners.read().await.get(name).copied();
        let index = match cached {
            Some(index) => index,
            None => match self.probe(name, failures).await {
                Probe::Found(index) => index,
                Probe::Missing => {
                    return Err(Attempt::Fail(ToolClientError::ToolNotFound(name.to_string())));
                }
                Probe::Unreachable => return Err(Attempt::Retry),
            },
        };

        let endpoint = &self.endpoints[index];
        debug!("Calling tool {} on {}", name, endpoint.name());
        match endpoint.call_tool(name, arguments.clone()).await {
            Ok(result) => match result.into_outcome() {
                Ok(value) => Ok(value),
                Err(e) if e.error_type == ToolErrorType::ToolNotFound => {
                    Err(Attempt::Fail(ToolClientError::ToolNotFound(name.to_string())))
                }
                Err(e) if e.error_type == ToolErrorType::TransportError => {
                    record(failures, index, &**endpoint, &e);
                    Err(Attempt::Retry)
                }
                Err(e) => Err(Attempt::Fail(ToolClientError::Tool(e))),
            },
            Err(e) if e.is_transient() => {
                record(failures, index, &**endpoint, &e);
                Err(Attempt::Retry)
            }
            Err(e) => Err(Attempt::Fail(ToolClientError::Endpoint {
                endpoint: endpoint.name().to_string(),
                source: e,
            })),
        }
    }

    /// Ask endpoints in order until one reports `name`
    async fn probe(&self, name: &str, failures: &mut Failures) -> Probe {
        let mut all_answered = true;
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            match endpoint.list_tools().await {
                Ok(tools) => {
                    self.remember(index, &tools).await;
                    if tools.iter().any(|t| t.name == name) {
                        // Another caller may have cached a different owner first
                        let owner = self.owners.read().await.get(name).copied();
                        return Probe::Found(owner.unwrap_or(index));
                    }
                }
                Err(e) => {
                    debug!("Probing {} for {} failed: {}", endpoint.name(), name, e);
                    record(failures, index, &**endpoint, &e);
                    all_answered = false;
                }
            }
        }
        if all_answered {
            Probe::Missing
        } else {
            Probe::Unreachable
        }
    }

    async fn remember(&self, index: usize, tools: &[Tool]) {
        let mut owners = self.owners.write().await;
        for tool in tools {
            owners.entry(tool.name.clone()).or_insert(index);
        }
    }
}

fn record(failures: &mut Failures, index: usize, endpoint: &dyn McpEndpoint, error: &dyn fmt::Display) {
    failures.insert(
        index,
        EndpointFailure {
            endpoint: endpoint.name().to_string(),
            message: error.to_string(),
        },
    );
}
