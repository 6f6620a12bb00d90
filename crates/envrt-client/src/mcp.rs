//! MCP tool endpoints

use async_trait::async_trait;
use envrt_core::Tool;
use envrt_core::jsonrpc::{Request, Response};
use envrt_core::mcp::{CallToolParams, CallToolResult, ListToolsResult};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::transport::{SESSION_HEADER, decode_response};

/// One server answering `tools/list` and `tools/call`
#[async_trait]
pub trait McpEndpoint: Send + Sync {
    /// Label used in logs and failure reports
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Tool failures come back in-band in the result, not as `Err`
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult>;
}

/// JSON-RPC over `POST {base}/mcp`
pub struct HttpMcpEndpoint {
    base_url: String,
    http: reqwest::Client,
    session_id: Option<String>,
    next_id: AtomicI64,
}

impl HttpMcpEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            session_id: None,
            next_id: AtomicI64::new(1),
        }
    }

    /// Route calls to an existing session instead of a scratch environment
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, method, params);

        let mut builder = self.http.post(format!("{}/mcp", self.base_url)).json(&request);
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session);
        }
        let response: Response = decode_response(builder.send().await?).await?;
        let result = response.into_result().map_err(|e| ClientError::Rpc {
            code: e.code,
            message: e.message,
        })?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl McpEndpoint for HttpMcpEndpoint {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.rpc("tools/list", serde_json::json!({})).await?;
        Ok(result.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.rpc("tools/call", serde_json::to_value(params)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        // port 9 (discard) is not listening in test environments
        let endpoint = HttpMcpEndpoint::new("http://127.0.0.1:9/")
            .with_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(endpoint.name(), "http://127.0.0.1:9");
        let err = endpoint.list_tools().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
    }
}
