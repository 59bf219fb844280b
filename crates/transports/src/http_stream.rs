//! Streamable HTTP transport: one JSON-RPC message per `POST /mcp`.

use crate::jsonrpc::{JsonRpcResponse, McpHandler, INVALID_REQUEST, PARSE_ERROR};
use crate::{bind, health, info_endpoints, SessionCloser};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use browser_mcp_core::Result;
use browser_mcp_tools::ConnectionScope;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Scope for requests that never initialized a session.
const ANONYMOUS: &str = "http-anonymous";

#[derive(Clone)]
pub struct HttpState {
    handler: McpHandler,
    sessions: Arc<Mutex<HashMap<String, ConnectionScope>>>,
    request_timeout: Duration,
    max_request_size: usize,
}

impl HttpState {
    pub fn new(handler: McpHandler) -> Self {
        let transport = handler.state().config().transport.clone();
        Self {
            handler,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: Duration::from_secs(transport.request_timeout_secs.max(1)),
            max_request_size: transport.max_request_size,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, ConnectionScope>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }
}

pub fn router(state: HttpState) -> Router {
    let limit = state.max_request_size;
    Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete))
        .route("/messages", post(handle_post))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(handler: McpHandler, shutdown: CancellationToken) -> Result<()> {
    let config = handler.state().config().clone();
    let server = handler.state().clone();
    let state = HttpState::new(handler);
    let listener = bind(&config.server.host, config.server.port).await?;
    info!(
        "HTTP stream transport listening on http://{}:{}/mcp",
        config.server.host, config.server.port
    );
    let closer = SessionCloser::spawn(server, shutdown.clone());
    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    closer.finish().await;
    served?;

    let ids: Vec<String> = state.sessions().drain().map(|(id, _)| id).collect();
    for id in ids {
        state.handler.state().disconnect(&id).await;
    }
    Ok(())
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn rpc_reply(status: StatusCode, response: JsonRpcResponse) -> Response {
    (status, Json(response)).into_response()
}

async fn handle_post(State(state): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_reply(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e)),
            )
        }
    };
    if !message.is_object() {
        return rpc_reply(
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "Invalid Request: expected a JSON object"),
        );
    }

    let initializing = message.get("method").and_then(Value::as_str) == Some("initialize");
    let (scope, new_session) = if initializing {
        let id = Uuid::new_v4().simple().to_string();
        let scope = state.handler.state().connect(&id);
        state.sessions().insert(id.clone(), scope.clone());
        info!(session = %id, "HTTP session started");
        (scope, Some(id))
    } else if let Some(id) = session_id(&headers) {
        let found = state.sessions().get(&id).cloned();
        match found {
            Some(scope) => (scope, None),
            None => {
                warn!(session = %id, "Request for unknown HTTP session");
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": format!("unknown session '{}'", id) })),
                )
                    .into_response();
            }
        }
    } else {
        (state.handler.state().connect(ANONYMOUS), None)
    };

    // Tool calls carry their own deadlines and always answer with an envelope.
    let tool_call = message.get("method").and_then(Value::as_str) == Some("tools/call");
    let handled = if tool_call {
        Ok(state.handler.handle_value(&scope, message).await)
    } else {
        tokio::time::timeout(state.request_timeout, state.handler.handle_value(&scope, message)).await
    };
    let mut response = match handled {
        Ok(Some(reply)) => rpc_reply(StatusCode::OK, reply),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(_) => {
            warn!(
                timeout_secs = state.request_timeout.as_secs_f64(),
                "HTTP request timed out"
            );
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({
                    "error": format!(
                        "request did not complete within {}ms",
                        state.request_timeout.as_millis()
                    )
                })),
            )
                .into_response()
        }
    };

    if let Some(id) = new_session {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response();
    };
    let removed = state.sessions().remove(&id);
    match removed {
        Some(_) => {
            state.handler.state().disconnect(&id).await;
            info!(session = %id, "HTTP session ended");
            StatusCode::NO_CONTENT.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_health(State(state): State<HttpState>) -> impl IntoResponse {
    Json(health(&state.handler, state.session_count()))
}

async fn handle_info(State(state): State<HttpState>) -> impl IntoResponse {
    let config = state.handler.state().config();
    let base = format!("http://{}:{}", config.server.host, config.server.port);
    Json(info_endpoints(
        &state.handler,
        &[
            ("post_message", format!("{}/mcp", base)),
            ("health", format!("{}/health", base)),
            ("info", format!("{}/info", base)),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use browser_mcp_core::TransportMode;
    use browser_mcp_tools::testing::FakeEngine;
    use tower::ServiceExt;

    fn app_with(engine: &FakeEngine, tweak: impl FnOnce(HttpState) -> HttpState) -> (HttpState, Router) {
        let handler = McpHandler::new(test_state(engine), TransportMode::HttpStream);
        let state = tweak(HttpState::new(handler));
        (state.clone(), router(state))
    }

    fn app() -> (HttpState, Router) {
        app_with(&FakeEngine::new(), |s| s)
    }

    fn post(path: &str, body: impl Into<String>) -> Request<Body> {
        Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(body.into()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_assigns_session() {
        let (state, app) = app();
        let response = app
            .clone()
            .oneshot(post("/mcp", r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(state.session_count(), 1);
        let body = json_body(response).await;
        assert_eq!(body["result"]["protocolVersion"], crate::jsonrpc::PROTOCOL_VERSION);

        let listed = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .header(SESSION_HEADER, &session)
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        assert_eq!(json_body(listed).await["result"]["tools"].as_array().unwrap().len(), 8);

        let deleted = app
            .clone()
            .oneshot(
                Request::delete("/mcp")
                    .header(SESSION_HEADER, &session)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.session_count(), 0);

        let stale = app
            .oneshot(
                Request::post("/mcp")
                    .header(SESSION_HEADER, &session)
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stale.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_messages_alias_and_notifications() {
        let (_, app) = app();
        let response = app
            .clone()
            .oneshot(post("/messages", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["result"], json!({}));

        let response = app
            .oneshot(post("/mcp", r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let (_, app) = app();
        let response = app.oneshot(post("/mcp", "{oops")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let (_, app) = app();
        let huge = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"ping","params":{{"pad":"{}"}}}}"#,
            "x".repeat(2 * 1024 * 1024)
        );
        let response = app.oneshot(post("/mcp", huge)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_tool_call_outlives_request_timeout() {
        let engine = FakeEngine::new();
        let (_, app) = app_with(&engine, |s| s.with_request_timeout(Duration::from_millis(100)));
        let call = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": "wait_for_element",
                "arguments": {"selector": ".never", "timeout": 0.4}
            }
        });
        let response = app.oneshot(post("/mcp", call.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["isError"], true);
        let envelope: Value =
            serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["error"]["kind"], "TimeoutError");
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let (_, app) = app();
        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let body = json_body(health).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["transport"], "http_stream");

        let info = app
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(info).await;
        assert_eq!(body["protocol"], "mcp");
        assert!(body["endpoints"]["post_message"]
            .as_str()
            .unwrap()
            .ends_with("/mcp"));
    }
}
