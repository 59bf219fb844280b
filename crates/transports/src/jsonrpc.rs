//! JSON-RPC 2.0 framing and MCP method handling, shared by every transport.

use browser_mcp_core::TransportMode;
use browser_mcp_tools::{ConnectionScope, ServerState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

// ─── MCP handler ──────────────────────────────────────────────────────────────

/// Answers MCP requests for one transport. Cheap to clone.
#[derive(Clone)]
pub struct McpHandler {
    state: Arc<ServerState>,
    transport: TransportMode,
}

impl McpHandler {
    pub fn new(state: Arc<ServerState>, transport: TransportMode) -> Self {
        Self { state, transport }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn transport(&self) -> TransportMode {
        self.transport
    }

    /// Handle one raw message. `None` means nothing should be sent back.
    pub async fn handle_text(&self, scope: &ConnectionScope, text: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(scope, value).await,
            Err(e) => Some(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )),
        }
    }

    pub async fn handle_value(&self, scope: &ConnectionScope, value: Value) -> Option<JsonRpcResponse> {
        let request = match parse_request(value) {
            Ok(request) => request,
            Err(response) => return Some(response),
        };
        debug!(
            connection = %scope.id,
            method = %request.method,
            transport = %self.transport,
            "MCP request"
        );

        let result = self.dispatch(scope, &request).await;
        let id = request.id?;
        Some(match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::error(id, code, message),
        })
    }

    async fn dispatch(&self, scope: &ConnectionScope, request: &JsonRpcRequest) -> Result<Value, (i64, String)> {
        let config = self.state.config();
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": {
                    "name": config.server.name,
                    "version": config.server.version,
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self.state.list_tools().iter().map(|t| t.to_wire()).collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params: CallParams = request
                    .params
                    .clone()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))?
                    .unwrap_or(CallParams {
                        name: None,
                        arguments: None,
                    });
                let name = params
                    .name
                    .ok_or_else(|| (INVALID_PARAMS, "Invalid params: missing tool name".to_string()))?;
                let response = self
                    .state
                    .call_tool(scope, &name, params.arguments.as_ref())
                    .await;
                Ok(response.to_mcp_result())
            }
            "server/info" => Ok(self.server_info()),
            method if method.starts_with("notifications/") => Ok(Value::Null),
            method => Err((METHOD_NOT_FOUND, format!("Method not found: {}", method))),
        }
    }

    pub fn server_info(&self) -> Value {
        let config = self.state.config();
        json!({
            "name": config.server.name,
            "version": config.server.version,
            "protocol": "mcp",
            "protocolVersion": PROTOCOL_VERSION,
            "transport": self.transport.as_str(),
            "capabilities": ["tools/list", "tools/call"],
            "tools": self.state.catalog().names(),
        })
    }
}

fn parse_request(value: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    if !value.is_object() {
        return Err(JsonRpcResponse::error(
            Value::Null,
            INVALID_REQUEST,
            "Invalid Request: expected a JSON object",
        ));
    }
    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| JsonRpcResponse::error(id.clone(), INVALID_REQUEST, format!("Invalid Request: {}", e)))?;
    if request.jsonrpc != "2.0" {
        return Err(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        ));
    }
    Ok(request)
}
