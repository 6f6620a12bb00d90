//! HTTP transport

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use envrt_core::{EnvError, SchemaError, decode_plain};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{Dispatcher, SessionBinding, StepRequest};
use crate::environment::{EnvironmentFactory, FactoryArgs};
use crate::session::{SessionId, SessionInfo};
use crate::transport::websocket;

/// Header carrying the session id on HTTP requests
pub const SESSION_HEADER: &str = "x-session-id";

/// Build the HTTP router
///
/// - `GET /health`, `GET /metadata`, `GET /schema`
/// - `POST /reset`, `POST /step`, `GET /state`
/// - `POST /mcp` for JSON-RPC, `GET /ws` for WebSocket sessions
/// - `GET /sessions`, `POST /sessions`, `DELETE /sessions/{id}`, `GET /sessions/capacity`
pub fn router<F: EnvironmentFactory>(dispatcher: Arc<Dispatcher<F>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metadata", get(metadata::<F>))
        .route("/schema", get(schema::<F>))
        .route("/reset", post(reset::<F>))
        .route("/step", post(step::<F>))
        .route("/state", get(state::<F>))
        .route("/mcp", post(mcp::<F>))
        .route("/ws", get(websocket::ws_upgrade::<F>))
        .route("/sessions", get(list_sessions::<F>).post(create_session::<F>))
        .route("/sessions/capacity", get(capacity::<F>))
        .route("/sessions/{id}", delete(destroy_session::<F>))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

/// Error body: `{code, message}`
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// [`EnvError`] rendered as an HTTP response
pub struct ApiError(EnvError);

impl From<EnvError> for ApiError {
    fn from(err: EnvError) -> Self {
        ApiError(err)
    }
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        ApiError(EnvError::Schema(err))
    }
}

/// HTTP status for each runtime error
pub fn status_for(err: &EnvError) -> StatusCode {
    match err {
        EnvError::Schema(_) | EnvError::Protocol(_) => StatusCode::BAD_REQUEST,
        EnvError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        EnvError::SessionCapacity { .. } => StatusCode::TOO_MANY_REQUESTS,
        EnvError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        EnvError::Transport(_) => StatusCode::BAD_GATEWAY,
        EnvError::SessionCreation(_)
        | EnvError::EnvironmentFactory(_)
        | EnvError::ConcurrencyConfiguration(_)
        | EnvError::Environment(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn header_session(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn binding(headers: &HeaderMap) -> SessionBinding {
    header_session(headers)
        .map(SessionBinding::Explicit)
        .unwrap_or(SessionBinding::Implicit)
}

/// Empty bodies read as `null`
fn json_body(body: &Bytes) -> ApiResult<serde_json::Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| SchemaError::from(e).into())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn metadata<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
) -> Json<envrt_core::EnvironmentMetadata> {
    Json(dispatcher.metadata())
}

async fn schema<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
) -> Json<serde_json::Value> {
    Json(dispatcher.schema())
}

async fn reset<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let args = json_body(&body)?;
    Ok(Json(dispatcher.reset(&binding(&headers), args).await?))
}

async fn step<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let request: StepRequest = decode_plain(json_body(&body)?)?;
    let timeout = request.timeout()?;
    Ok(Json(
        dispatcher
            .step(&binding(&headers), request.action, timeout)
            .await?,
    ))
}

async fn state<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(dispatcher.state(&binding(&headers)).await?))
}

/// JSON-RPC over HTTP; stateless unless a session header is present
async fn mcp<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let binding = header_session(&headers).map(SessionBinding::Explicit);
    let text = String::from_utf8_lossy(&body);
    match dispatcher.handle_jsonrpc(binding.as_ref(), &text).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct SessionCreated {
    session_id: SessionId,
}

async fn create_session<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SessionCreated>)> {
    let args = match json_body(&body)? {
        serde_json::Value::Null => FactoryArgs::new(),
        other => decode_plain::<FactoryArgs>(other)?,
    };
    let session_id = dispatcher.create_session(args).await?;
    Ok((StatusCode::CREATED, Json(SessionCreated { session_id })))
}

async fn destroy_session<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let closed = dispatcher.close_session(&id).await;
    Json(serde_json::json!({ "session_id": id, "closed": closed }))
}

async fn list_sessions<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
) -> Json<Vec<SessionInfo>> {
    Json(dispatcher.sessions().await)
}

async fn capacity<F: EnvironmentFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
) -> Json<crate::capacity::CapacityStatus> {
    Json(dispatcher.capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::test_support::counter_factory;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt; // for `oneshot`

    fn app(config: ServerConfig) -> Router {
        router(Arc::new(Dispatcher::new(counter_factory, config).unwrap()))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        session: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(ServerConfig::default());
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_reset_step_state_on_implicit_session() {
        let app = app(ServerConfig::default());
        let (status, reset) = send(&app, "POST", "/reset", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reset["done"], false);

        let (status, step) = send(
            &app,
            "POST",
            "/step",
            None,
            Some(json!({"action": {"type": "increment", "by": 2}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(step["observation"]["count"], 2);
        assert_eq!(step["reward"], 2.0);

        let (_, state) = send(&app, "GET", "/state", None, None).await;
        assert_eq!(state["count"], 2);
    }

    #[tokio::test]
    async fn test_invalid_action_is_bad_request() {
        let app = app(ServerConfig::default());
        let (status, body) = send(
            &app,
            "POST",
            "/step",
            None,
            Some(json!({"action": {"type": "teleport"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "schema_error");
        assert!(body["message"].as_str().unwrap().contains("`action.type`"));

        let (status, _) = send(&app, "POST", "/step", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_capacity() {
        let app = app(ServerConfig::default().with_max_sessions(1));

        let (status, created) = send(&app, "POST", "/sessions", None, None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["session_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", "/sessions", None, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "session_capacity");

        let (_, capacity) = send(&app, "GET", "/sessions/capacity", None, None).await;
        assert_eq!(capacity["current_sessions"], 1);
        assert_eq!(capacity["accepting"], false);

        let (status, reset) = send(&app, "POST", "/reset", Some(&id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reset["observation"]["count"], 0);

        let uri = format!("/sessions/{}", id);
        let (_, first) = send(&app, "DELETE", &uri, None, None).await;
        assert_eq!(first["closed"], true);
        let (status, second) = send(&app, "DELETE", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["closed"], false);

        let (status, body) = send(&app, "GET", "/state", Some(&id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "session_not_found");
    }

    #[tokio::test]
    async fn test_list_sessions_reports_step_counts() {
        let app = app(ServerConfig::default().with_max_sessions(2));
        let (_, empty) = send(&app, "GET", "/sessions", None, None).await;
        assert_eq!(empty, json!([]));

        let (_, created) = send(&app, "POST", "/sessions", None, None).await;
        let id = created["session_id"].as_str().unwrap().to_string();
        send(&app, "POST", "/reset", Some(&id), None).await;
        for _ in 0..2 {
            send(
                &app,
                "POST",
                "/step",
                Some(&id),
                Some(json!({"action": {"type": "increment", "by": 1}})),
            )
            .await;
        }

        let (status, listed) = send(&app, "GET", "/sessions", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let sessions = listed.as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["session_id"], id.as_str());
        assert_eq!(sessions[0]["step_count"], 2);
        assert!(sessions[0]["state"].is_string());
    }

    #[tokio::test]
    async fn test_mcp_endpoint() {
        let app = app(ServerConfig::default());
        let (status, body) = send(
            &app,
            "POST",
            "/mcp",
            None,
            Some(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["result"]["tools"].as_array().unwrap().is_empty());

        let (status, _) = send(
            &app,
            "POST",
            "/mcp",
            None,
            Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_schema_and_metadata() {
        let app = app(ServerConfig::default());
        let (_, schema) = send(&app, "GET", "/schema", None, None).await;
        assert!(schema["action"].is_object());
        let (_, metadata) = send(&app, "GET", "/metadata", None, None).await;
        assert!(metadata["name"].is_string());
    }
}
