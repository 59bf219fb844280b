//! MCP transports: stdio, SSE and streamable HTTP.

pub mod http_stream;
pub mod jsonrpc;
pub mod sse;
pub mod stdio;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpHandler};

use browser_mcp_core::{Error, Result, TransportMode};
use browser_mcp_tools::ServerState;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Serve `state` over `mode` until the client goes away or `shutdown` fires.
pub async fn run(state: Arc<ServerState>, mode: TransportMode, shutdown: CancellationToken) -> Result<()> {
    let handler = McpHandler::new(state, mode);
    info!(transport = %mode, "Starting MCP transport");
    match mode {
        TransportMode::Stdio => stdio::serve(handler, shutdown).await,
        TransportMode::Sse => sse::serve(handler, shutdown).await,
        TransportMode::HttpStream => http_stream::serve(handler, shutdown).await,
    }
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        token.cancel();
    });
}

/// Shuts the session pools down the moment `shutdown` fires, while the
/// transport is still draining, so in-flight calls end with ShutdownError.
pub(crate) struct SessionCloser {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl SessionCloser {
    pub(crate) fn spawn(state: Arc<ServerState>, shutdown: CancellationToken) -> Self {
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            state.shutdown().await;
        });
        Self { task, shutdown }
    }

    /// Wait for the pools to close if shutdown was requested; otherwise stand down.
    pub(crate) async fn finish(self) {
        if self.shutdown.is_cancelled() {
            if let Err(e) = self.task.await {
                warn!("session shutdown task failed: {}", e);
            }
        } else {
            self.task.abort();
        }
    }
}

pub(crate) async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Transport(format!("failed to bind {}: {}", addr, e)))
}

pub(crate) fn health(handler: &McpHandler, connections: usize) -> Value {
    let state = handler.state();
    let stats = state.stats();
    json!({
        "status": "healthy",
        "service": state.config().server.name,
        "version": state.config().server.version,
        "transport": handler.transport().as_str(),
        "activeConnections": connections,
        "uptimeSecs": (Utc::now() - state.started_at()).num_seconds().max(0),
        "pools": stats.pools,
    })
}

pub(crate) fn info_endpoints(handler: &McpHandler, endpoints: &[(&str, String)]) -> Value {
    let mut info = handler.server_info();
    let map: serde_json::Map<String, Value> = endpoints
        .iter()
        .map(|(name, url)| (name.to_string(), Value::String(url.clone())))
        .collect();
    info["endpoints"] = Value::Object(map);
    info
}
