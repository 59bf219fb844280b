use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    Stdio,
    Sse,
    HttpStream,
}

impl TransportMode {
    pub const ALL: [TransportMode; 3] = [Self::Stdio, Self::Sse, Self::HttpStream];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::HttpStream => "http_stream",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Stdio => "Newline-delimited JSON-RPC over stdin/stdout",
            Self::Sse => "Server-Sent Events stream with POST /messages",
            Self::HttpStream => "Streamable HTTP, one JSON-RPC message per POST /mcp",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "http_stream" | "http" => Ok(Self::HttpStream),
            other => Err(Error::Config(format!(
                "unknown transport mode '{}', expected stdio, sse or http_stream",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Chrome,
    Edge,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolScope {
    #[default]
    Shared,
    PerConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_version")]
    pub version: String,
    #[serde(default)]
    pub transport_mode: TransportMode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_name() -> String {
    "mcp-browser-tools".to_string()
}

fn default_server_version() -> String {
    "0.3.1".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            transport_mode: TransportMode::default(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default)]
    pub engine: EngineKind,
    /// Explicit browser binary; auto-detected when absent.
    #[serde(default)]
    pub executable_path: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_launch_timeout_secs() -> u64 {
    15
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            executable_path: None,
            headless: true,
            user_agent: default_user_agent(),
            locale: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            launch_timeout_secs: default_launch_timeout_secs(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default)]
    pub scope: PoolScope,
    /// Launch every session at startup instead of on first acquire.
    #[serde(default)]
    pub warmup: bool,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_pool_size() -> usize {
    1
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reap_interval_secs() -> u64 {
    60
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            scope: PoolScope::default(),
            warmup: false,
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_click_timeout_ms")]
    pub click_timeout_ms: u64,
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_timeout_ms() -> u64 {
    300_000
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_click_timeout_ms() -> u64 {
    5_000
}

fn default_script_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn click(&self) -> Duration {
        Duration::from_millis(self.click_timeout_ms)
    }

    pub fn script(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            click_timeout_ms: default_click_timeout_ms(),
            script_timeout_ms: default_script_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    /// Also expose get_element_text and get_element_attribute.
    #[serde(default)]
    pub extended: bool,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_max_links")]
    pub max_links: usize,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

fn default_max_content_length() -> usize {
    5000
}

fn default_max_links() -> usize {
    100
}

fn default_max_images() -> usize {
    100
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            extended: false,
            max_content_length: default_max_content_length(),
            max_links: default_max_links(),
            max_images: default_max_images(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_max_request_size() -> usize {
    1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            max_request_size: default_max_request_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `MCP_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("MCP_TRANSPORT_MODE") {
            self.server.transport_mode = mode.parse()?;
        }
        if let Some(host) = lookup("MCP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("MCP_PORT") {
            self.server.port = parse_env("MCP_PORT", &port)?;
        }
        if let Some(level) = lookup("MCP_LOG_LEVEL") {
            self.server.log_level = level.to_lowercase();
        }
        if let Some(name) = lookup("MCP_SERVER_NAME") {
            self.server.name = name;
        }
        if let Some(version) = lookup("MCP_SERVER_VERSION") {
            self.server.version = version;
        }
        if let Some(size) = lookup("MCP_POOL_SIZE") {
            self.pool.size = parse_env("MCP_POOL_SIZE", &size)?;
        }
        if let Some(headless) = lookup("MCP_HEADLESS") {
            self.browser.headless = match headless.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::Config(format!(
                        "MCP_HEADLESS: expected a boolean, got '{}'",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be between 1 and 65535".to_string()));
        }
        if self.pool.size == 0 {
            return Err(Error::Config("pool.size must be at least 1".to_string()));
        }
        if self.timeouts.default_timeout_ms == 0 {
            return Err(Error::Config("timeouts.defaultTimeoutMs must be positive".to_string()));
        }
        if self.timeouts.default_timeout_ms > self.timeouts.max_timeout_ms {
            return Err(Error::Config(format!(
                "timeouts.defaultTimeoutMs ({}) exceeds timeouts.maxTimeoutMs ({})",
                self.timeouts.default_timeout_ms, self.timeouts.max_timeout_ms
            )));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.name, "mcp-browser-tools");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.transport_mode, TransportMode::Stdio);
        assert_eq!(config.pool.size, 1);
        assert_eq!(config.pool.scope, PoolScope::Shared);
        assert_eq!(config.tools.max_content_length, 5000);
        assert_eq!(config.transport.max_request_size, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_camel_case_fields() {
        let json = r#"{
            "server": { "transportMode": "http_stream", "port": 9100 },
            "pool": { "size": 3, "scope": "per_connection", "idleTimeoutSecs": 10 },
            "timeouts": { "clickTimeoutMs": 750 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.transport_mode, TransportMode::HttpStream);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.pool.size, 3);
        assert_eq!(config.pool.scope, PoolScope::PerConnection);
        assert_eq!(config.pool.idle_timeout_secs, 10);
        assert_eq!(config.timeouts.click(), Duration::from_millis(750));
        assert_eq!(config.timeouts.navigation_timeout_ms, 30_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MCP_TRANSPORT_MODE", "sse"),
            ("MCP_PORT", "8123"),
            ("MCP_POOL_SIZE", "4"),
            ("MCP_HEADLESS", "false"),
            ("MCP_LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.transport_mode, TransportMode::Sse);
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.pool.size, 4);
        assert!(!config.browser.headless);
        assert_eq!(config.server.log_level, "debug");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|k| (k == "MCP_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MCP_PORT"));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Config::default();
        config.pool.size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timeouts.default_timeout_ms = config.timeouts.max_timeout_ms + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transport_mode_parse() {
        assert_eq!("http-stream".parse::<TransportMode>().unwrap(), TransportMode::HttpStream);
        assert_eq!("STDIO".parse::<TransportMode>().unwrap(), TransportMode::Stdio);
        assert!("websocket".parse::<TransportMode>().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("browser-mcp-config-{}", std::process::id()));
        let paths = Paths::with_base(dir.clone());
        let mut config = Config::default();
        config.tools.extended = true;
        config.save(&paths.config_file()).unwrap();

        let loaded = Config::load_or_default(&paths).unwrap();
        assert!(loaded.tools.extended);
        let _ = std::fs::remove_dir_all(dir);
    }
}
