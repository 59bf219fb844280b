//! Tool dispatcher: name lookup, validation, session lease, envelope.

use crate::browser::session::BrowserSession;
use crate::catalog::{ToolCatalog, ToolDescriptor};
use crate::pool::SessionPool;
use crate::validation::{self, ToolArgs, ValidationLimits};
use browser_mcp_core::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One typed piece of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text { text: String },
    Json { data: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// The uniform result of every tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolResponse {
    pub fn ok(content: Vec<ContentItem>) -> Self {
        Self {
            success: true,
            content,
            error: None,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            success: false,
            content: Vec::new(),
            error: Some(ToolFailure {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// MCP `tools/call` result: the envelope as a single text block.
    pub fn to_mcp_result(&self) -> Value {
        let text = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":{{"kind":"InternalError","message":"{}"}}}}"#,
                e
            )
        });
        json!({
            "content": [{ "type": "text", "text": text }],
            "isError": !self.success,
        })
    }
}

pub struct ToolDispatcher {
    catalog: Arc<ToolCatalog>,
    limits: ValidationLimits,
}

impl ToolDispatcher {
    pub fn new(catalog: Arc<ToolCatalog>, limits: ValidationLimits) -> Self {
        Self { catalog, limits }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn list_tools(&self) -> &[ToolDescriptor] {
        self.catalog.list()
    }

    /// Check a call without touching any session.
    pub fn prepare(&self, name: &str, args: Option<&Value>) -> Result<ToolArgs> {
        let descriptor = self
            .catalog
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        validation::validate(descriptor, args, &self.limits)
    }

    /// Run one tool call to completion. Never fails: errors become the
    /// `success: false` envelope.
    pub async fn call_tool(&self, pool: &SessionPool, name: &str, args: Option<&Value>) -> ToolResponse {
        let started = Instant::now();
        let result = match self.prepare(name, args) {
            Ok(parsed) => run(pool, parsed).await,
            Err(e) => Err(e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(content) => {
                info!(tool = name, elapsed_ms, "Tool call succeeded");
                ToolResponse::ok(content)
            }
            Err(e) => {
                let kind = e.kind();
                if e.is_recoverable() {
                    info!(tool = name, elapsed_ms, kind = %kind, error = %e, "Tool call failed");
                } else {
                    warn!(tool = name, elapsed_ms, kind = %kind, error = %e, "Tool call failed");
                }
                ToolResponse::failure(&e)
            }
        }
    }
}

async fn run(pool: &SessionPool, args: ToolArgs) -> Result<Vec<ContentItem>> {
    let mut lease = pool.acquire().await?;
    debug!(session = %lease.id(), "Running tool on session");
    let cancel = lease.cancellation();
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(Error::Shutdown(
            "server is shutting down; operation cancelled".to_string(),
        )),
        result = execute(&mut lease, args) => result,
    };
    drop(lease);
    result
}

fn json_item(data: impl Serialize) -> Result<ContentItem> {
    Ok(ContentItem::Json {
        data: serde_json::to_value(data)?,
    })
}

async fn execute(session: &mut BrowserSession, args: ToolArgs) -> Result<Vec<ContentItem>> {
    let item = match args {
        ToolArgs::NavigateToUrl { url } => json_item(session.navigate(&url).await?)?,
        ToolArgs::GetPageContent { format } => json_item(session.get_content(format).await?)?,
        ToolArgs::GetPageTitle => ContentItem::Text {
            text: session.get_title().await?,
        },
        ToolArgs::ClickElement { selector, timeout } => {
            session.click(&selector, timeout).await?;
            json_item(json!({ "selector": selector, "clicked": true }))?
        }
        ToolArgs::FillInput {
            selector,
            text,
            timeout,
        } => {
            session.fill(&selector, &text, timeout).await?;
            json_item(json!({ "selector": selector, "text": text }))?
        }
        ToolArgs::WaitForElement { selector, timeout } => {
            let started = Instant::now();
            session.wait_for(&selector, timeout).await?;
            json_item(json!({
                "selector": selector,
                "found": true,
                "waited_ms": started.elapsed().as_millis() as u64,
            }))?
        }
        ToolArgs::ExecuteJavascript { script } => {
            let result = session.evaluate(&script).await?;
            json_item(json!({ "result": result }))?
        }
        ToolArgs::TakeScreenshot { path, full_page } => {
            json_item(session.screenshot(&path, full_page).await?)?
        }
        ToolArgs::GetElementText { selector, timeout } => {
            let text = session.get_element_text(&selector, timeout).await?;
            json_item(json!({ "selector": selector, "text": text }))?
        }
        ToolArgs::GetElementAttribute {
            selector,
            attribute,
            timeout,
        } => {
            let value = session
                .get_element_attribute(&selector, &attribute, timeout)
                .await?;
            json_item(json!({ "selector": selector, "attribute": attribute, "value": value }))?
        }
    };
    Ok(vec![item])
}
