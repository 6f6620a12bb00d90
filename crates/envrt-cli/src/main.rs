//! envrt server
//!
//! Hosts the echo environment over HTTP, WebSocket and MCP (`POST /mcp`), or
//! MCP over stdio when `ENVRT_TRANSPORT=stdio`.
//!
//! Environment:
//! - `ENVRT_BIND` listen address (default `0.0.0.0:8000`)
//! - `ENVRT_TRANSPORT` `http` (default) or `stdio`
//! - `ENVRT_MAX_SESSIONS`, `ENVRT_IDLE_TIMEOUT_SECS`, `ENVRT_REAP_INTERVAL_SECS`,
//!   `ENVRT_STEP_TIMEOUT_SECS`, `ENVRT_TOOL_TIMEOUT_SECS`, `ENVRT_IMPLICIT_SESSION`
//! - `RUST_LOG` log filter (default `info`)

use anyhow::{Context, Result, bail};
use echo_env::echo_factory;
use envrt_server::{EnvServer, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the stdio transport, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from_env().context("Invalid ENVRT_* configuration")?;
    info!(
        "envrt server starting (max_sessions={}, idle_timeout={:?})",
        config.max_sessions, config.idle_timeout
    );
    let server = EnvServer::new(echo_factory, config)?;

    let transport = std::env::var("ENVRT_TRANSPORT").unwrap_or_else(|_| "http".into());
    match transport.as_str() {
        "stdio" => {
            info!("Serving MCP on stdio");
            server.run_stdio().await?;
        }
        "http" => {
            let bind = std::env::var("ENVRT_BIND").unwrap_or_else(|_| DEFAULT_BIND.into());
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            server.serve(listener, shutdown_signal()).await?;
        }
        other => bail!("Unknown ENVRT_TRANSPORT `{}` (expected `http` or `stdio`)", other),
    }

    info!("envrt server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
