//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One client per WebSocket endpoint (browser-level or page-level target).
//! Responses are routed to waiting callers by command id; events fan out to
//! subscribers. Dropping a pending `send_command` future removes its entry.

use super::engine::{EngineError, EngineResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type ListenerMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    event_listeners: ListenerMap,
    /// Set by the reader task once the socket is gone.
    closed: Arc<AtomicBool>,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

/// Removes a pending entry when the awaiting future is dropped early.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> EngineResult<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            EngineError::Disconnected(format!("failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_reader = closed.clone();
        let closed_writer = closed.clone();

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!(error = %e, "CDP WebSocket write error");
                    closed_writer.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let tx = pending_clone.lock().ok().and_then(|mut p| p.remove(&id));
                            if let Some(tx) = tx {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let params = val.get("params").cloned().unwrap_or(Value::Null);
                            if let Ok(mut listeners) = events_clone.lock() {
                                if let Some(senders) = listeners.get_mut(method) {
                                    senders.retain(|tx| !tx.is_closed());
                                    for tx in senders.iter() {
                                        let _ = tx.try_send(params.clone());
                                    }
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "CDP WebSocket read error");
                        break;
                    }
                    _ => {}
                }
            }
            closed_reader.store(true, Ordering::SeqCst);
            // Waiting callers observe a closed channel instead of hanging.
            if let Ok(mut pending) = pending_clone.lock() {
                pending.clear();
            }
            if let Ok(mut listeners) = events_clone.lock() {
                listeners.clear();
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            closed,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reader_handle,
            writer_handle,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> EngineResult<Value> {
        if self.is_closed() {
            return Err(EngineError::Disconnected(format!(
                "cannot send '{}': CDP connection closed",
                method
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| EngineError::Protocol("pending map poisoned".to_string()))?
            .insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: self.pending.clone(),
        };

        self.ws_tx.send(msg.to_string()).await.map_err(|_| {
            EngineError::Disconnected(format!("cannot send '{}': CDP writer stopped", method))
        })?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error");
                    Err(EngineError::Protocol(format!("{}: {}", method, message)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(EngineError::Disconnected(format!(
                "CDP connection closed while waiting for '{}'",
                method
            ))),
            Err(_) => Err(EngineError::Timeout(format!(
                "CDP command '{}' timed out after {}s",
                method,
                self.command_timeout.as_secs()
            ))),
        }
    }

    /// Subscribe to a CDP event. The receiver yields event params.
    pub fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        if let Ok(mut listeners) = self.event_listeners.lock() {
            listeners.entry(method.to_string()).or_default().push(tx);
        }
        rx
    }

    pub async fn enable_domain(&self, domain: &str) -> EngineResult<()> {
        self.send_command(&format!("{}.enable", domain), json!({})).await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> EngineResult<Value> {
        self.send_command("Page.navigate", json!({"url": url})).await
    }

    /// Evaluate JavaScript in the page and return its value.
    ///
    /// A thrown exception becomes `EngineError::Script`.
    pub async fn evaluate_js(&self, expression: &str) -> EngineResult<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            return Err(EngineError::Script(exception_message(details)));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Capture a PNG screenshot, returned base64-encoded.
    pub async fn screenshot(&self, full_page: bool) -> EngineResult<String> {
        let mut params = json!({"format": "png"});
        if full_page {
            let metrics = self.send_command("Page.getLayoutMetrics", json!({})).await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"));
            if let Some(size) = size {
                let width = size.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let height = size.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0);
                if width > 0.0 && height > 0.0 {
                    params["clip"] = json!({
                        "x": 0, "y": 0, "width": width, "height": height, "scale": 1,
                    });
                }
            }
            params["captureBeyondViewport"] = json!(true);
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| EngineError::Protocol("no screenshot data returned".to_string()))
    }

    /// Insert text into the focused element, bypassing key events.
    pub async fn insert_text(&self, text: &str) -> EngineResult<()> {
        self.send_command("Input.insertText", json!({"text": text})).await?;
        Ok(())
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> EngineResult<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str, locale: Option<&str>) -> EngineResult<()> {
        let mut params = json!({"userAgent": user_agent});
        if let Some(locale) = locale {
            params["acceptLanguage"] = json!(locale);
        }
        self.send_command("Emulation.setUserAgentOverride", params).await?;
        Ok(())
    }

    /// Create a new page target (tab) and return its targetId.
    pub async fn create_target(&self, url: &str) -> EngineResult<String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| EngineError::Protocol("no targetId returned from createTarget".to_string()))
    }

    pub async fn close_target(&self, target_id: &str) -> EngineResult<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Human-readable text of a `Runtime.evaluate` exceptionDetails object.
fn exception_message(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(|d| d.as_str())
        .or_else(|| details.get("text").and_then(|t| t.as_str()))
        .unwrap_or("uncaught exception")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_message_prefers_description() {
        let details = json!({
            "text": "Uncaught",
            "exception": {"description": "Error: boom\n    at <anonymous>:1:7"}
        });
        assert!(exception_message(&details).starts_with("Error: boom"));

        let details = json!({"text": "Uncaught SyntaxError"});
        assert_eq!(exception_message(&details), "Uncaught SyntaxError");
        assert_eq!(exception_message(&json!({})), "uncaught exception");
    }

    #[test]
    fn test_pending_guard_removes_entry() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        pending.lock().unwrap().insert(7, tx);
        {
            let _guard = PendingGuard {
                id: 7,
                pending: pending.clone(),
            };
        }
        assert!(pending.lock().unwrap().is_empty());
    }
}
