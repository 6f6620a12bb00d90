//! # envrt-client
//!
//! Clients for envrt servers.
//!
//! This crate provides:
//! - `AsyncEnvClient` with HTTP and WebSocket implementations
//! - `SyncEnvClient`, a blocking facade over any async client
//! - `MultiEndpointToolClient`, routing MCP tool calls across servers with retry
//! - Container/remote providers and a health wait helper

pub mod error;
pub mod mcp;
pub mod multi;
pub mod provider;
pub mod sync;
pub mod transport;

pub use error::{ClientError, Result};
pub use mcp::{HttpMcpEndpoint, McpEndpoint};
pub use multi::{EndpointFailure, MultiEndpointToolClient, RetryConfig, ToolClientError};
pub use provider::{ContainerProvider, ContainerSpec, ProvidedClient, ProviderHandle, wait_for_health};
pub use sync::SyncEnvClient;
pub use transport::{AsyncEnvClient, HttpEnvClient, SESSION_HEADER, WsEnvClient};
