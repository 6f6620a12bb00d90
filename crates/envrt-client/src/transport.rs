//! Async environment clients over HTTP and WebSocket

use async_trait::async_trait;
use envrt_core::{ResetArgs, StepResponse};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Header carrying the session id on HTTP requests
pub const SESSION_HEADER: &str = "x-session-id";

/// Async client for one environment session
#[async_trait]
pub trait AsyncEnvClient: Send + 'static {
    /// Establish the session
    async fn connect(&mut self) -> Result<()>;

    /// Start a new episode
    async fn reset(&mut self, args: ResetArgs) -> Result<StepResponse>;

    /// Apply one action
    async fn step(&mut self, action: serde_json::Value) -> Result<StepResponse>;

    /// Current environment state
    async fn state(&mut self) -> Result<serde_json::Value>;

    /// Release the session; calling it again is a no-op
    async fn close(&mut self) -> Result<()>;
}

/// Session client over the HTTP endpoints
///
/// `connect` creates a dedicated session unless one was supplied with
/// [`HttpEnvClient::with_session`]; only self-created sessions are destroyed
/// on `close`.
pub struct HttpEnvClient {
    base_url: String,
    http: reqwest::Client,
    session_id: Option<String>,
    owns_session: bool,
}

impl HttpEnvClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            session_id: None,
            owns_session: false,
        }
    }

    /// Attach to an existing session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.owns_session = false;
        self
    }

    /// Per-request timeout for every HTTP call
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_session_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_id {
            Some(id) => request.header(SESSION_HEADER, id),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = self.with_session_header(request).send().await?;
        decode_response(response).await
    }
}

/// Decode a success body or turn an error body into [`ClientError::Server`]
pub(crate) async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
    Err(ClientError::Server {
        status: status.as_u16(),
        code: body["code"].as_str().unwrap_or("unknown").to_string(),
        message: body["message"]
            .as_str()
            .or(status.canonical_reason())
            .unwrap_or("request failed")
            .to_string(),
    })
}

#[async_trait]
impl AsyncEnvClient for HttpEnvClient {
    async fn connect(&mut self) -> Result<()> {
        if self.session_id.is_some() {
            return Ok(());
        }
        let created: serde_json::Value = self
            .send(self.http.post(self.url("/sessions")).json(&serde_json::json!({})))
            .await?;
        let id = created["session_id"]
            .as_str()
            .ok_or_else(|| ClientError::Protocol("session response missing session_id".into()))?;
        debug!("Connected to {} with session {}", self.base_url, id);
        self.session_id = Some(id.to_string());
        self.owns_session = true;
        Ok(())
    }

    async fn reset(&mut self, args: ResetArgs) -> Result<StepResponse> {
        self.send(self.http.post(self.url("/reset")).json(&args)).await
    }

    async fn step(&mut self, action: serde_json::Value) -> Result<StepResponse> {
        let body = serde_json::json!({ "action": action });
        self.send(self.http.post(self.url("/step")).json(&body)).await
    }

    async fn state(&mut self) -> Result<serde_json::Value> {
        self.send(self.http.get(self.url("/state"))).await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.owns_session {
            return Ok(());
        }
        let Some(id) = self.session_id.clone() else {
            return Ok(());
        };
        // keep the id on failure so close can be retried
        let _: serde_json::Value = self
            .send(self.http.delete(self.url(&format!("/sessions/{}", id))))
            .await?;
        self.session_id = None;
        self.owns_session = false;
        debug!("Closed session {}", id);
        Ok(())
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Session client over the WebSocket endpoint; the connection is the session
pub struct WsEnvClient {
    url: String,
    stream: Option<WsStream>,
}

impl WsEnvClient {
    /// Client for a full `ws://.../ws` URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
        }
    }

    /// Client for a server's HTTP base URL
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        Self::new(format!("{}/ws", ws_base))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one frame and wait for its response frame
    async fn request(&mut self, frame: serde_json::Value) -> Result<serde_json::Value> {
        let stream = self.stream.as_mut().ok_or(ClientError::Closed)?;
        stream.send(Message::text(frame.to_string())).await?;
        loop {
            let message = stream
                .next()
                .await
                .ok_or_else(|| ClientError::Transport("connection closed by server".into()))??;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(ClientError::Transport("connection closed by server".into()));
                }
                _ => continue,
            };
            let response: serde_json::Value = serde_json::from_str(text.as_str())?;
            if response["type"] == "error" {
                return Err(ClientError::Server {
                    status: 0,
                    code: response["code"].as_str().unwrap_or("unknown").to_string(),
                    message: response["message"].as_str().unwrap_or_default().to_string(),
                });
            }
            return Ok(response);
        }
    }

    async fn request_data(&mut self, frame: serde_json::Value, expected: &str) -> Result<serde_json::Value> {
        let mut response = self.request(frame).await?;
        if response["type"] != expected {
            return Err(ClientError::Protocol(format!(
                "expected `{}` frame, got {}",
                expected, response["type"]
            )));
        }
        Ok(response["data"].take())
    }
}

#[async_trait]
impl AsyncEnvClient for WsEnvClient {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        debug!("WebSocket connected to {}", self.url);
        self.stream = Some(stream);
        Ok(())
    }

    async fn reset(&mut self, args: ResetArgs) -> Result<StepResponse> {
        let data = self
            .request_data(serde_json::json!({"type": "reset", "data": args}), "observation")
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn step(&mut self, action: serde_json::Value) -> Result<StepResponse> {
        let data = self
            .request_data(serde_json::json!({"type": "step", "data": action}), "observation")
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn state(&mut self) -> Result<serde_json::Value> {
        self.request_data(serde_json::json!({"type": "state"}), "state")
            .await
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        if let Err(e) = self.request(serde_json::json!({"type": "close"})).await {
            debug!("Close frame not acknowledged: {}", e);
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        debug!("WebSocket to {} closed", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_from_base() {
        assert_eq!(
            WsEnvClient::from_base_url("http://127.0.0.1:8000/").url(),
            "ws://127.0.0.1:8000/ws"
        );
        assert_eq!(
            WsEnvClient::from_base_url("https://env.example").url(),
            "wss://env.example/ws"
        );
    }

    #[tokio::test]
    async fn test_ws_request_before_connect_is_closed() {
        let mut client = WsEnvClient::new("ws://127.0.0.1:9/ws");
        assert!(matches!(client.state().await, Err(ClientError::Closed)));
        // closing an unconnected client is a no-op
        assert!(client.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_http_close_without_owned_session_is_noop() {
        let mut client = HttpEnvClient::new("http://127.0.0.1:9").with_session("shared");
        assert!(client.close().await.is_ok());
        assert_eq!(client.session_id(), Some("shared"));
    }

    #[tokio::test]
    async fn test_http_failed_close_keeps_owned_session() {
        let mut client = HttpEnvClient::new("http://127.0.0.1:9");
        client.session_id = Some("owned".into());
        client.owns_session = true;

        assert!(client.close().await.is_err());
        assert_eq!(client.session_id(), Some("owned"));
        assert!(client.owns_session);
    }
}
