//! Engine capability set consumed by browser sessions.
//!
//! Sessions only talk to these traits, so the CDP engine and the in-memory
//! test engine are interchangeable.

use async_trait::async_trait;
use browser_mcp_core::config::{BrowserConfig, EngineKind};
use browser_mcp_core::Error;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element matches selector '{0}'")]
    NoSuchElement(String),

    #[error("script threw: {0}")]
    Script(String),

    #[error("engine command timed out: {0}")]
    Timeout(String),

    #[error("engine connection closed: {0}")]
    Disconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Launch(msg) => Error::EngineFatal(format!("browser launch failed: {}", msg)),
            EngineError::Disconnected(msg) => Error::EngineFatal(msg),
            EngineError::Navigation(msg) => Error::Navigation(msg),
            EngineError::NoSuchElement(sel) => {
                Error::ElementNotFound(format!("no element matches selector '{}'", sel))
            }
            EngineError::Script(msg) => Error::Script(msg),
            EngineError::Timeout(msg) => Error::Timeout(msg),
            EngineError::Protocol(msg) => Error::Other(format!("engine protocol error: {}", msg)),
            EngineError::Io(e) => Error::Io(e),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Everything a launcher needs to start one browser instance.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub engine: EngineKind,
    pub executable_path: Option<String>,
    pub headless: bool,
    pub user_agent: String,
    pub locale: Option<String>,
    pub viewport: (u32, u32),
    pub launch_timeout: Duration,
    pub extra_args: Vec<String>,
    pub user_data_dir: PathBuf,
}

impl LaunchOptions {
    pub fn from_config(config: &BrowserConfig, user_data_dir: PathBuf) -> Self {
        Self {
            engine: config.engine,
            executable_path: config.executable_path.clone(),
            headless: config.headless,
            user_agent: config.user_agent.clone(),
            locale: config.locale.clone(),
            viewport: (config.viewport_width, config.viewport_height),
            launch_timeout: Duration::from_secs(config.launch_timeout_secs),
            extra_args: config.extra_args.clone(),
            user_data_dir,
        }
    }
}

/// Result of a completed top-level navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationInfo {
    pub url: String,
    /// Main document HTTP status, when the engine observed one.
    pub status: Option<u16>,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> EngineResult<Box<dyn EngineHandle>>;
}

#[async_trait]
pub trait EngineHandle: Send + Sync {
    async fn new_page(&self) -> EngineResult<Box<dyn PageHandle>>;

    async fn close(&self) -> EngineResult<()>;

    fn is_alive(&self) -> bool;
}

/// One browser tab.
///
/// Methods never impose their own deadline on waits: callers bound them with
/// `tokio::time::timeout`, and dropping the future must leave the handle usable.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn goto(&self, url: &str) -> EngineResult<NavigationInfo>;

    async fn click(&self, selector: &str) -> EngineResult<()>;

    async fn fill(&self, selector: &str, text: &str) -> EngineResult<()>;

    /// Resolves once `selector` matches at least one element.
    async fn wait_for_selector(&self, selector: &str) -> EngineResult<()>;

    async fn evaluate(&self, script: &str) -> EngineResult<Value>;

    /// PNG bytes.
    async fn screenshot(&self, full_page: bool) -> EngineResult<Vec<u8>>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> EngineResult<String>;

    async fn title(&self) -> EngineResult<String>;

    async fn url(&self) -> EngineResult<String>;

    async fn text_content(&self, selector: &str) -> EngineResult<Option<String>>;

    async fn get_attribute(&self, selector: &str, name: &str) -> EngineResult<Option<String>>;

    async fn close(&self) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_mcp_core::ErrorKind;

    #[test]
    fn test_engine_error_classification() {
        let cases = [
            (EngineError::Launch("no chrome".into()), ErrorKind::EngineFatalError),
            (EngineError::Disconnected("ws".into()), ErrorKind::EngineFatalError),
            (EngineError::Navigation("dns".into()), ErrorKind::NavigationError),
            (EngineError::NoSuchElement("#x".into()), ErrorKind::ElementNotFoundError),
            (EngineError::Script("boom".into()), ErrorKind::ScriptError),
            (EngineError::Timeout("cmd".into()), ErrorKind::TimeoutError),
            (EngineError::Protocol("bad".into()), ErrorKind::InternalError),
        ];
        for (engine_err, kind) in cases {
            assert_eq!(Error::from(engine_err).kind(), kind);
        }
    }

    #[test]
    fn test_launch_options_from_config() {
        let config = BrowserConfig::default();
        let opts = LaunchOptions::from_config(&config, PathBuf::from("/tmp/p"));
        assert_eq!(opts.viewport, (1920, 1080));
        assert_eq!(opts.launch_timeout, Duration::from_secs(15));
        assert!(opts.headless);
    }
}
