//! Container/remote providers and the health wait helper

use async_trait::async_trait;
use envrt_core::{ResetArgs, StepResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::transport::{AsyncEnvClient, HttpEnvClient};

/// What to start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub env: HashMap<String, String>,
    /// Port the server listens on inside the container
    pub port: Option<u16>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// A started server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    pub id: String,
    /// Reachable base URL, e.g. `http://127.0.0.1:8000`
    pub base_url: String,
}

/// Starts and stops processes hosting an envrt server
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    async fn spawn(&self, spec: &ContainerSpec) -> Result<ProviderHandle>;

    /// Called exactly once per handle by [`ProvidedClient`]
    async fn teardown(&self, handle: &ProviderHandle) -> Result<()>;
}

const HEALTH_POLL_START: Duration = Duration::from_millis(100);
const HEALTH_POLL_MAX: Duration = Duration::from_secs(2);

/// Poll `GET {base_url}/health` until it answers 2xx or `timeout` passes
pub async fn wait_for_health(base_url: &str, timeout: Duration) -> Result<()> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let http = reqwest::Client::builder().timeout(HEALTH_POLL_MAX).build()?;
    let deadline = Instant::now() + timeout;
    let mut delay = HEALTH_POLL_START;

    loop {
        match http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("{} is healthy", base_url);
                return Ok(());
            }
            Ok(response) => debug!("{} not ready: {}", url, response.status()),
            Err(e) => debug!("{} not reachable: {}", url, e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ClientError::Timeout(timeout));
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(HEALTH_POLL_MAX);
    }
}

/// Client whose server was started by a provider
///
/// `close` closes the inner client, then tears the server down once.
pub struct ProvidedClient<C: AsyncEnvClient> {
    provider: Arc<dyn ContainerProvider>,
    handle: Option<ProviderHandle>,
    client: C,
}

impl<C: AsyncEnvClient> ProvidedClient<C> {
    pub fn new(provider: Arc<dyn ContainerProvider>, handle: ProviderHandle, client: C) -> Self {
        Self {
            provider,
            handle: Some(handle),
            client,
        }
    }

    /// `None` once torn down
    pub fn handle(&self) -> Option<&ProviderHandle> {
        self.handle.as_ref()
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl ProvidedClient<HttpEnvClient> {
    /// Spawn `spec`, wait for it to become healthy and attach an HTTP client
    ///
    /// A server that never becomes healthy is torn down before the error is
    /// returned.
    pub async fn from_remote_image(
        provider: Arc<dyn ContainerProvider>,
        spec: &ContainerSpec,
        health_timeout: Duration,
    ) -> Result<Self> {
        let handle = provider.spawn(spec).await?;
        info!("Started {} as {} at {}", spec.image, handle.id, handle.base_url);

        if let Err(e) = wait_for_health(&handle.base_url, health_timeout).await {
            warn!("{} never became healthy: {}", handle.id, e);
            if let Err(teardown) = provider.teardown(&handle).await {
                warn!("Teardown of {} failed: {}", handle.id, teardown);
            }
            return Err(e);
        }

        let client = HttpEnvClient::new(handle.base_url.clone());
        Ok(Self::new(provider, handle, client))
    }
}

#[async_trait]
impl<C: AsyncEnvClient> AsyncEnvClient for ProvidedClient<C> {
    async fn connect(&mut self) -> Result<()> {
        if self.handle.is_none() {
            return Err(ClientError::Closed);
        }
        self.client.connect().await
    }

    async fn reset(&mut self, args: ResetArgs) -> Result<StepResponse> {
        self.client.reset(args).await
    }

    async fn step(&mut self, action: serde_json::Value) -> Result<StepResponse> {
        self.client.step(action).await
    }

    async fn state(&mut self) -> Result<serde_json::Value> {
        self.client.state().await
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.client.close().await;
        if let Some(handle) = self.handle.take() {
            self.provider.teardown(&handle).await?;
            debug!("Tore down {}", handle.id);
        }
        closed
    }
}
