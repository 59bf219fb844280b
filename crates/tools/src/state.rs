//! Process-wide server state handed to every transport.

use crate::browser::engine::BrowserLauncher;
use crate::catalog::{ToolCatalog, ToolDescriptor};
use crate::dispatcher::{ToolDispatcher, ToolResponse};
use crate::pool::{ConnectionScope, ManagerStats, SessionFactory, SessionManager};
use crate::validation::ValidationLimits;
use browser_mcp_core::{Config, Paths, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct ServerState {
    config: Arc<Config>,
    catalog: Arc<ToolCatalog>,
    dispatcher: ToolDispatcher,
    sessions: SessionManager,
    started_at: DateTime<Utc>,
}

impl ServerState {
    /// Validate `config`, build the catalog and the session manager.
    /// No browser is started here unless `pool.warmup` is set and
    /// [`ServerState::warmup`] is called.
    pub fn new(config: Config, paths: Paths, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let catalog = Arc::new(ToolCatalog::new(config.tools.extended)?);
        let dispatcher = ToolDispatcher::new(
            catalog.clone(),
            ValidationLimits::from(&config.timeouts),
        );
        let factory = SessionFactory::new(launcher, config.clone(), paths);
        let sessions = SessionManager::new(&config, factory);
        info!(
            tools = catalog.len(),
            pool_size = config.pool.size,
            scope = ?config.pool.scope,
            "Server state ready"
        );
        Ok(Self {
            config,
            catalog,
            dispatcher,
            sessions,
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn list_tools(&self) -> &[ToolDescriptor] {
        self.dispatcher.list_tools()
    }

    pub fn connect(&self, connection_id: &str) -> ConnectionScope {
        self.sessions.on_connect(connection_id)
    }

    pub async fn disconnect(&self, connection_id: &str) {
        self.sessions.on_disconnect(connection_id).await;
    }

    pub async fn call_tool(&self, scope: &ConnectionScope, name: &str, args: Option<&Value>) -> ToolResponse {
        self.dispatcher.call_tool(&scope.pool, name, args).await
    }

    pub async fn warmup(&self) -> Result<()> {
        self.sessions.warmup().await
    }

    pub fn stats(&self) -> ManagerStats {
        self.sessions.stats()
    }

    pub async fn shutdown(&self) {
        info!("Shutting down browser sessions");
        self.sessions.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use browser_mcp_core::config::PoolScope;
    use browser_mcp_core::ErrorKind;
    use serde_json::json;

    fn state(engine: &FakeEngine, tweak: impl FnOnce(&mut Config)) -> Result<ServerState> {
        let mut config = Config::default();
        config.pool.idle_timeout_secs = 0;
        config.timeouts.shutdown_grace_ms = 500;
        tweak(&mut config);
        let paths = Paths::with_base(std::env::temp_dir().join("browser-mcp-state-tests"));
        ServerState::new(config, paths, Arc::new(engine.clone()))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let engine = FakeEngine::new();
        let err = state(&engine, |c| c.pool.size = 0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[tokio::test]
    async fn test_per_connection_scopes_are_isolated() {
        let engine = FakeEngine::new();
        let state = state(&engine, |c| c.pool.scope = PoolScope::PerConnection).unwrap();
        let a = state.connect("a");
        let b = state.connect("b");

        let nav = json!({"url": "https://a.example/"});
        assert!(state.call_tool(&a, "navigate_to_url", Some(&nav)).await.success);
        let title_b = state.call_tool(&b, "get_page_title", None).await;
        assert_eq!(title_b.error_kind(), Some(ErrorKind::StateError));
        assert_eq!(engine.launches(), 2);

        state.disconnect("a").await;
        assert_eq!(state.stats().connections, 1);
        state.shutdown().await;
        assert_eq!(engine.open_engines(), 0);
    }

    #[tokio::test]
    async fn test_shared_scope_sees_same_page() {
        let engine = FakeEngine::new();
        let state = state(&engine, |_| {}).unwrap();
        let a = state.connect("a");
        let b = state.connect("b");

        let nav = json!({"url": "https://shared.example/"});
        assert!(state.call_tool(&a, "navigate_to_url", Some(&nav)).await.success);
        assert!(state.call_tool(&b, "get_page_title", None).await.success);
        assert_eq!(engine.launches(), 1);
        state.shutdown().await;
    }
}
