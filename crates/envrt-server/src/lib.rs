//! # envrt-server
//!
//! Session runtime and server for envrt environments.
//!
//! This crate provides:
//! - `Environment` and `EnvironmentFactory` traits for implementing environments
//! - Session lifecycle, capacity admission and idle reaping
//! - A transport-agnostic dispatcher
//! - HTTP, WebSocket and MCP JSON-RPC (HTTP and stdio) transports

pub mod capacity;
pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod manager;
pub mod mcp;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use capacity::{CapacityGuard, CapacityPermit, CapacityStatus};
pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, RuntimeContext, SessionBinding, StepRequest};
pub use environment::{BoxError, Environment, EnvironmentFactory, FactoryArgs};
pub use manager::{ScratchEnv, SessionManager};
pub use session::{LifecycleState, Session, SessionId, SessionInfo};

use envrt_core::{EnvError, Result};
use std::future::Future;
use std::sync::Arc;

/// envrt server
pub struct EnvServer<F: EnvironmentFactory> {
    dispatcher: Arc<Dispatcher<F>>,
}

impl<F: EnvironmentFactory> EnvServer<F> {
    /// Create a server building environments with `factory`
    pub fn new(factory: F, config: ServerConfig) -> Result<Self> {
        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(factory, config)?),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<F>> {
        &self.dispatcher
    }

    /// HTTP router with every endpoint mounted
    pub fn router(&self) -> axum::Router {
        transport::http::router(self.dispatcher.clone())
    }

    /// Serve HTTP and WebSocket until `shutdown` resolves, then close every session
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let manager = self.dispatcher.manager().clone();
        let config = self.dispatcher.config();
        let reaper = config
            .idle_timeout
            .map(|_| manager.spawn_reaper(config.reap_interval));

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("envrt server listening on {}", addr);
        }
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| EnvError::Transport(format!("HTTP server failed: {}", e)));

        if let Some(reaper) = reaper {
            reaper.abort();
        }
        manager.shutdown().await;
        served
    }

    /// Serve MCP JSON-RPC on stdio
    pub async fn run_stdio(self) -> Result<()> {
        let manager = self.dispatcher.manager().clone();
        let outcome = transport::stdio::run(self.dispatcher).await;
        manager.shutdown().await;
        outcome
    }
}
