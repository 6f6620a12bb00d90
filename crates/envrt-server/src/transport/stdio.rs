//! stdio transport for MCP JSON-RPC
//!
//! One client per process: a single session is created at startup and
//! released at EOF.

use envrt_core::{EnvError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::dispatcher::{Dispatcher, SessionBinding};
use crate::environment::{EnvironmentFactory, FactoryArgs};

/// Run the MCP server on stdin/stdout
pub async fn run<F: EnvironmentFactory>(dispatcher: Arc<Dispatcher<F>>) -> Result<()> {
    info!("envrt MCP server starting on stdio");
    serve_lines(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Serve newline-delimited JSON-RPC over any reader/writer pair
pub async fn serve_lines<F, R, W>(dispatcher: Arc<Dispatcher<F>>, mut reader: R, mut writer: W) -> Result<()>
where
    F: EnvironmentFactory,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session_id = dispatcher.create_session(FactoryArgs::new()).await?;
    let binding = SessionBinding::Explicit(session_id.clone());
    let outcome = pump(&dispatcher, &binding, &mut reader, &mut writer).await;
    dispatcher.close_session(&session_id).await;
    outcome
}

async fn pump<F, R, W>(
    dispatcher: &Dispatcher<F>,
    binding: &SessionBinding,
    reader: &mut R,
    writer: &mut W,
) -> Result<()>
where
    F: EnvironmentFactory,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| EnvError::Transport(format!("Failed to read stdin: {}", e)))?;

        if bytes_read == 0 {
            info!("Client disconnected (EOF)");
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {}", trimmed);

        let Some(response) = dispatcher.handle_jsonrpc(Some(binding), trimmed).await else {
            continue;
        };
        let response_json = serde_json::to_string(&response)?;

        debug!("Sending: {}", response_json);

        writer
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| EnvError::Transport(format!("Failed to write stdout: {}", e)))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| EnvError::Transport(format!("Failed to write newline: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| EnvError::Transport(format!("Failed to flush stdout: {}", e)))?;
    }
}
