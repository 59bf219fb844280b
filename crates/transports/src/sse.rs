//! SSE transport: `GET /sse` opens a stream, `POST /messages` feeds it.

use crate::jsonrpc::{JsonRpcResponse, McpHandler};
use crate::{bind, health, info_endpoints, SessionCloser};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use browser_mcp_core::Result;
use browser_mcp_tools::ConnectionScope;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct SseConnection {
    tx: mpsc::Sender<JsonRpcResponse>,
    scope: ConnectionScope,
}

#[derive(Clone)]
pub struct SseState {
    handler: McpHandler,
    connections: Arc<Mutex<HashMap<String, SseConnection>>>,
    heartbeat: Duration,
    shutdown: CancellationToken,
}

impl SseState {
    pub fn new(handler: McpHandler, shutdown: CancellationToken) -> Self {
        let heartbeat = Duration::from_secs(handler.state().config().transport.heartbeat_secs.max(1));
        Self {
            handler,
            connections: Arc::new(Mutex::new(HashMap::new())),
            heartbeat,
            shutdown,
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, SseConnection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }
}

/// Unregisters the connection when its event stream is dropped.
struct StreamGuard {
    id: String,
    state: SseState,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.state.connections().remove(&self.id).is_none() {
            return;
        }
        info!(connection = %self.id, "SSE client disconnected");
        let state = self.state.handler.state().clone();
        let id = self.id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { state.disconnect(&id).await });
        }
    }
}

pub fn router(state: SseState) -> Router {
    Router::new()
        .route("/sse", get(handle_sse))
        .route("/messages", post(handle_message))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(handler: McpHandler, shutdown: CancellationToken) -> Result<()> {
    let config = handler.state().config().clone();
    let server = handler.state().clone();
    let state = SseState::new(handler, shutdown.clone());
    let listener = bind(&config.server.host, config.server.port).await?;
    info!(
        "SSE transport listening on http://{}:{}/sse",
        config.server.host, config.server.port
    );
    let closer = SessionCloser::spawn(server, shutdown.clone());
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    closer.finish().await;
    served?;
    Ok(())
}

async fn handle_sse(State(state): State<SseState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let id = Uuid::new_v4().simple().to_string();
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
    let scope = state.handler.state().connect(&id);
    state
        .connections()
        .insert(id.clone(), SseConnection { tx, scope });
    info!(connection = %id, "SSE client connected");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={}", id));
    let guard = StreamGuard {
        id,
        state: state.clone(),
    };
    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let response = rx.recv().await?;
        let event = match serde_json::to_string(&response) {
            Ok(data) => Event::default().event("message").data(data),
            Err(e) => Event::default().comment(format!("encode error: {}", e)),
        };
        Some((Ok(event), (rx, guard)))
    });

    let events = stream::once(async move { Ok(endpoint) })
        .chain(messages)
        .take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(events).keep_alive(KeepAlive::new().interval(state.heartbeat))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };
    let found = state
        .connections()
        .get(&id)
        .map(|c| (c.tx.clone(), c.scope.clone()));
    let Some((tx, scope)) = found else {
        warn!(connection = %id, "Message for unknown SSE session");
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let handler = state.handler.clone();
    tokio::spawn(async move {
        if let Some(response) = handler.handle_text(&scope, &body).await {
            if tx.send(response).await.is_err() {
                debug!(connection = %scope.id, "SSE stream gone before reply");
            }
        }
    });
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn handle_health(State(state): State<SseState>) -> impl IntoResponse {
    Json(health(&state.handler, state.connection_count()))
}

async fn handle_info(State(state): State<SseState>) -> impl IntoResponse {
    let config = state.handler.state().config();
    let base = format!("http://{}:{}", config.server.host, config.server.port);
    Json(info_endpoints(
        &state.handler,
        &[
            ("sse", format!("{}/sse", base)),
            ("post_message", format!("{}/messages", base)),
            ("health", format!("{}/health", base)),
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

    fn app() -> (SseState, Router) {
        let handler = McpHandler::new(test_state(&FakeEngine::new()), TransportMode::Sse);
        let state = SseState::new(handler, CancellationToken::new());
        (state.clone(), router(state))
    }

    async fn next_chunk(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let (_, app) = app();
        let response = app
            .oneshot(
                Request::post("/messages?sessionId=nope")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_endpoint_and_reply() {
        let (state, app) = app();
        let response = app
            .clone()
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body().into_data_stream();

        let first = next_chunk(&mut body).await;
        assert!(first.contains("event: endpoint"), "{first}");
        let path = first
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .unwrap()
            .trim()
            .to_string();
        assert!(path.starts_with("/messages?sessionId="));
        assert_eq!(state.connection_count(), 1);

        let posted = app
            .oneshot(
                Request::post(path.as_str())
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(posted.status(), StatusCode::ACCEPTED);

        let reply = next_chunk(&mut body).await;
        assert!(reply.contains("event: message"), "{reply}");
        assert!(reply.contains(r#""id":9"#), "{reply}");

        drop(body);
        assert_eq!(state.connection_count(), 0);
    }
}
