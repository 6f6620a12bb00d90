//! WebSocket transport
//!
//! Each connection owns one session for its lifetime. Frames are JSON text:
//! requests are `{type: "reset" | "step" | "state" | "close" | "mcp", data}`
//! and every request gets exactly one response frame.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use envrt_core::{EnvError, decode_plain};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dispatcher::{Dispatcher, SessionBinding};
use crate::environment::{EnvironmentFactory, FactoryArgs};

/// Inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub kind: WsRequestKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsRequestKind {
    Reset,
    Step,
    State,
    Close,
    Mcp,
}

/// Outbound frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsResponse {
    Observation { data: serde_json::Value },
    State { data: serde_json::Value },
    Mcp { data: serde_json::Value },
    Closed,
    Error { code: String, message: String },
}

impl WsResponse {
    fn error(err: &EnvError) -> Self {
        WsResponse::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) async fn ws_upgrade<F: EnvironmentFactory>(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<Dispatcher<F>>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher))
}

async fn handle_socket<F: EnvironmentFactory>(mut socket: WebSocket, dispatcher: Arc<Dispatcher<F>>) {
    let session_id = match dispatcher.create_session(FactoryArgs::new()).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Rejecting WebSocket connection: {}", e);
            let _ = send_frame(&mut socket, &WsResponse::error(&e)).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!("WebSocket connected, session {}", session_id);
    let binding = SessionBinding::Explicit(session_id.clone());

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                let err = EnvError::Protocol("binary frames are not supported".into());
                if send_frame(&mut socket, &WsResponse::error(&err)).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("WebSocket receive failed: {}", e);
                break;
            }
        };

        let (frame, close) = handle_frame(&dispatcher, &binding, text.as_str()).await;
        if send_frame(&mut socket, &frame).await.is_err() || close {
            break;
        }
    }

    dispatcher.close_session(&session_id).await;
    tracing::info!("WebSocket disconnected, session {} released", session_id);
}

/// Process one text frame; the flag asks the caller to end the connection
async fn handle_frame<F: EnvironmentFactory>(
    dispatcher: &Dispatcher<F>,
    binding: &SessionBinding,
    text: &str,
) -> (WsResponse, bool) {
    let request = match serde_json::from_str::<serde_json::Value>(text)
        .map_err(EnvError::from)
        .and_then(|raw| decode_plain::<WsRequest>(raw).map_err(EnvError::from))
    {
        Ok(request) => request,
        Err(e) => return (WsResponse::error(&e), false),
    };

    let outcome = match request.kind {
        WsRequestKind::Reset => dispatcher
            .reset(binding, request.data)
            .await
            .map(|data| WsResponse::Observation { data }),
        WsRequestKind::Step => dispatcher
            .step(binding, request.data, None)
            .await
            .map(|data| WsResponse::Observation { data }),
        WsRequestKind::State => dispatcher
            .state(binding)
            .await
            .map(|data| WsResponse::State { data }),
        WsRequestKind::Mcp => {
            let response = dispatcher
                .handle_jsonrpc_value(Some(binding), request.data)
                .await;
            serde_json::to_value(response)
                .map(|data| WsResponse::Mcp { data })
                .map_err(EnvError::from)
        }
        WsRequestKind::Close => return (WsResponse::Closed, true),
    };

    match outcome {
        Ok(frame) => (frame, false),
        Err(e) => (WsResponse::error(&e), false),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &WsResponse) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize frame: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::test_support::counter_factory;
    use crate::transport::http::router;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn spawn_server(config: ServerConfig) -> (String, Arc<Dispatcher<impl EnvironmentFactory>>) {
        let dispatcher = Arc::new(Dispatcher::new(counter_factory, config).unwrap());
        let app = router(dispatcher.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}/ws", addr), dispatcher)
    }

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn roundtrip(ws: &mut Client, frame: serde_json::Value) -> serde_json::Value {
        ws.send(WsMessage::text(frame.to_string())).await.unwrap();
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_session_roundtrip() {
        let (url, dispatcher) = spawn_server(ServerConfig::default()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let reset = roundtrip(&mut ws, json!({"type": "reset"})).await;
        assert_eq!(reset["type"], "observation");
        assert_eq!(reset["data"]["done"], false);

        let step = roundtrip(&mut ws, json!({"type": "step", "data": {"type": "increment", "by": 4}})).await;
        assert_eq!(step["data"]["observation"]["count"], 4);

        let state = roundtrip(&mut ws, json!({"type": "state"})).await;
        assert_eq!(state["type"], "state");
        assert_eq!(state["data"]["count"], 4);

        let mcp = roundtrip(
            &mut ws,
            json!({"type": "mcp", "data": {"jsonrpc": "2.0", "id": 1, "method": "tools/list"}}),
        )
        .await;
        assert_eq!(mcp["type"], "mcp");
        assert!(mcp["data"]["result"]["tools"].is_array());

        assert_eq!(dispatcher.capacity().current_sessions, 1);
        let closed = roundtrip(&mut ws, json!({"type": "close"})).await;
        assert_eq!(closed["type"], "closed");

        // the server releases the slot once the socket loop exits
        for _ in 0..50 {
            if dispatcher.capacity().current_sessions == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(dispatcher.capacity().current_sessions, 0);
    }

    #[tokio::test]
    async fn test_websocket_error_frames_keep_connection() {
        let (url, _dispatcher) = spawn_server(ServerConfig::default()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let bad = roundtrip(&mut ws, json!({"type": "teleport"})).await;
        assert_eq!(bad["type"], "error");
        assert_eq!(bad["code"], "schema_error");

        let invalid = roundtrip(&mut ws, json!({"type": "step", "data": {"type": "increment"}})).await;
        assert_eq!(invalid["type"], "error");

        let state = roundtrip(&mut ws, json!({"type": "state"})).await;
        assert_eq!(state["type"], "state");
    }

    #[tokio::test]
    async fn test_websocket_rejected_at_capacity() {
        let (url, dispatcher) = spawn_server(ServerConfig::default().with_max_sessions(1)).await;
        let (_held, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
        for _ in 0..50 {
            if dispatcher.capacity().current_sessions == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let (mut second, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let frame = match second.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => serde_json::from_str::<serde_json::Value>(text.as_str()).unwrap(),
            other => panic!("expected error frame, got {:?}", other),
        };
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "session_capacity");
    }
}
