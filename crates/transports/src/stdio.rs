//! Newline-delimited JSON-RPC over stdin/stdout.

use crate::jsonrpc::{JsonRpcResponse, McpHandler};
use crate::SessionCloser;
use browser_mcp_core::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONNECTION_ID: &str = "stdio";

/// Serve MCP on the process's stdin/stdout until EOF or `shutdown`.
pub async fn serve(handler: McpHandler, shutdown: CancellationToken) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    serve_io(handler, stdin, tokio::io::stdout(), shutdown).await
}

/// Each request runs as its own task; replies go through a single writer.
pub async fn serve_io<R, W>(
    handler: McpHandler,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let state = handler.state().clone();
    let scope = state.connect(CONNECTION_ID);
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let closer = SessionCloser::spawn(state.clone(), shutdown.clone());

    info!("stdio transport ready");
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if !line.trim().is_empty() => {
                debug!("MCP ← {}", line.chars().take(200).collect::<String>());
                let handler = handler.clone();
                let scope = scope.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = handler.handle_text(&scope, &line).await {
                        let _ = tx.send(response).await;
                    }
                });
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Err(e) => {
                error!("stdin read error: {}", e);
                break;
            }
        }
    }

    // The writer finishes once every in-flight request has replied.
    drop(tx);
    if let Err(e) = writer_task.await {
        warn!("stdio writer task failed: {}", e);
    }
    closer.finish().await;
    state.disconnect(CONNECTION_ID).await;
    Ok(())
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<JsonRpcResponse>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => {
                error!("failed to encode response: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!("stdout write error: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            error!("stdout flush error: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::tests::test_state;
    use browser_mcp_core::TransportMode;
    use browser_mcp_tools::testing::FakeEngine;
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_serves_until_eof() {
        let engine = FakeEngine::new();
        let handler = McpHandler::new(test_state(&engine), TransportMode::Stdio);
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
            "garbage\n",
        );
        let (client, server) = tokio::io::duplex(64 * 1024);
        serve_io(handler, input.as_bytes(), server, CancellationToken::new())
            .await
            .unwrap();

        let mut output = String::new();
        let mut client = client;
        client.read_to_string(&mut output).await.unwrap();
        let replies: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        let ids: Vec<Value> = replies.iter().map(|r| r["id"].clone()).collect();
        assert!(ids.contains(&json!(1)));
        assert!(ids.contains(&json!(2)));
        assert!(replies
            .iter()
            .any(|r| r["id"].is_null() && r["error"]["code"] == -32700));
    }

    #[tokio::test]
    async fn test_shutdown_ends_pending_call_promptly() {
        let engine = FakeEngine::new();
        let handler = McpHandler::new(test_state(&engine), TransportMode::Stdio);
        let (mut input, input_server) = tokio::io::duplex(4096);
        let (output, output_server) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let served = tokio::spawn(serve_io(
            handler,
            BufReader::new(input_server),
            output_server,
            shutdown.clone(),
        ));

        let call = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "wait_for_element",
                "arguments": {"selector": ".never", "timeout": 10}
            }
        });
        input.write_all(format!("{}\n", call).as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.pending_waits(), 1);

        let cancelled_at = Instant::now();
        shutdown.cancel();
        let mut lines = BufReader::new(output).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        served.await.unwrap().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));

        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"]["isError"], true);
        let envelope: Value =
            serde_json::from_str(reply["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["error"]["kind"], "ShutdownError");
        assert_eq!(engine.pending_waits(), 0);
        assert_eq!(engine.open_engines(), 0);
    }
}
