//! MCP JSON-RPC handling

use envrt_core::error_codes;
use envrt_core::jsonrpc::{JSONRPC_VERSION, Request, RequestId, Response};
use envrt_core::mcp::{
    CallToolParams, CallToolResult, InitializeResult, ListToolsResult, MCP_PROTOCOL_VERSION,
    ServerInfo,
};

use crate::dispatcher::{Dispatcher, SessionBinding};
use crate::environment::EnvironmentFactory;

impl<F: EnvironmentFactory> Dispatcher<F> {
    /// Handle one JSON-RPC message given as text
    ///
    /// Returns `None` for notifications.
    pub async fn handle_jsonrpc(&self, binding: Option<&SessionBinding>, body: &str) -> Option<Response> {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(message) => self.handle_jsonrpc_value(binding, message).await,
            Err(e) => {
                tracing::debug!("Unparseable JSON-RPC body: {}", e);
                Some(Response::parse_error(format!("Parse error: {}", e)))
            }
        }
    }

    /// Handle one already-parsed JSON-RPC message
    pub async fn handle_jsonrpc_value(
        &self,
        binding: Option<&SessionBinding>,
        message: serde_json::Value,
    ) -> Option<Response> {
        if message.is_array() {
            return Some(Response::error(
                None,
                error_codes::INVALID_REQUEST,
                "Batch requests are not supported",
            ));
        }

        // Recover the id even when the rest of the envelope is bad
        let id = message
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
        let request: Request = match serde_json::from_value(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(Response::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ));
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(Response::error(
                request.id,
                error_codes::INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {}", request.jsonrpc),
            ));
        }

        tracing::debug!("JSON-RPC {}", request.method);
        let response = handle_request(self, binding, &request).await;
        if request.is_notification() {
            None
        } else {
            Some(response)
        }
    }
}

/// Supported JSON-RPC methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum McpMethod {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
}

impl McpMethod {
    fn parse(method: &str) -> Option<Self> {
        match method {
            "initialize" => Some(McpMethod::Initialize),
            "notifications/initialized" => Some(McpMethod::Initialized),
            "ping" => Some(McpMethod::Ping),
            "tools/list" => Some(McpMethod::ToolsList),
            "tools/call" => Some(McpMethod::ToolsCall),
            _ => None,
        }
    }
}

async fn handle_request<F: EnvironmentFactory>(
    dispatcher: &Dispatcher<F>,
    binding: Option<&SessionBinding>,
    request: &Request,
) -> Response {
    let Some(method) = McpMethod::parse(&request.method) else {
        return Response::error(
            request.id.clone(),
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        );
    };
    match method {
        McpMethod::Initialize => handle_initialize(request, dispatcher),
        McpMethod::Initialized | McpMethod::Ping => {
            Response::success(request.id.clone(), serde_json::json!({}))
        }
        McpMethod::ToolsList => handle_tools_list(request, dispatcher, binding).await,
        McpMethod::ToolsCall => handle_tools_call(request, dispatcher, binding).await,
    }
}

fn handle_initialize<F: EnvironmentFactory>(request: &Request, dispatcher: &Dispatcher<F>) -> Response {
    let metadata = dispatcher.metadata();
    let result = InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: serde_json::json!({
            "tools": { "listChanged": false }
        }),
        server_info: ServerInfo {
            name: metadata.name,
            version: metadata
                .version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        },
    };
    to_response(request, &result)
}

async fn handle_tools_list<F: EnvironmentFactory>(
    request: &Request,
    dispatcher: &Dispatcher<F>,
    binding: Option<&SessionBinding>,
) -> Response {
    match dispatcher.list_tools(binding).await {
        Ok(tools) => to_response(request, &ListToolsResult { tools }),
        Err(e) => Response::error(request.id.clone(), e.rpc_code(), e.to_string()),
    }
}

async fn handle_tools_call<F: EnvironmentFactory>(
    request: &Request,
    dispatcher: &Dispatcher<F>,
    binding: Option<&SessionBinding>,
) -> Response {
    let params: CallToolParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Response::error(
                request.id.clone(),
                error_codes::INVALID_PARAMS,
                format!("Invalid tool call params: {}", e),
            );
        }
    };

    match dispatcher
        .call_tool(binding, &params.name, params.arguments)
        .await
    {
        Ok(obs) => to_response(request, &CallToolResult::from(obs)),
        Err(e) => Response::error(request.id.clone(), e.rpc_code(), e.to_string()),
    }
}

fn to_response<T: serde::Serialize>(request: &Request, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::success(request.id.clone(), value),
        Err(e) => Response::error(
            request.id.clone(),
            error_codes::INTERNAL_ERROR,
            format!("Failed to serialize result: {}", e),
        ),
    }
}
