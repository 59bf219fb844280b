//! Chromium-family engine: launches Chrome/Edge as a child process and
//! drives it over CDP.

use super::cdp::CdpClient;
use super::engine::{
    BrowserLauncher, EngineError, EngineHandle, EngineResult, LaunchOptions, NavigationInfo,
    PageHandle,
};
use async_trait::async_trait;
use base64::Engine as _;
use browser_mcp_core::config::EngineKind;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

impl ChromeLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> EngineResult<Box<dyn EngineHandle>> {
        let engine = ChromeEngine::launch(options).await?;
        Ok(Box::new(engine))
    }
}

/// A running browser process plus its browser-level CDP connection.
pub struct ChromeEngine {
    kind: EngineKind,
    debug_port: u16,
    process: Mutex<Option<Child>>,
    browser: Arc<CdpClient>,
    user_data_dir: PathBuf,
    user_agent: String,
    locale: Option<String>,
    viewport: (u32, u32),
}

impl ChromeEngine {
    pub async fn launch(options: &LaunchOptions) -> EngineResult<Self> {
        let browser_path = match &options.executable_path {
            Some(path) => path.clone(),
            None => find_browser_binary(options.engine).ok_or_else(|| {
                EngineError::Launch(format!(
                    "{} not found; install it or set browser.executablePath",
                    options.engine.as_str()
                ))
            })?,
        };

        tokio::fs::create_dir_all(&options.user_data_dir).await?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(options, debug_port);

        info!(
            port = debug_port,
            headless = options.headless,
            browser = options.engine.as_str(),
            path = %browser_path,
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Launch(format!("failed to spawn {}: {}", browser_path, e)))?;

        let browser_ws_url = wait_for_cdp_ready(debug_port, options.launch_timeout).await?;
        let browser = CdpClient::connect(&browser_ws_url).await?;

        info!(port = debug_port, ws_url = %browser_ws_url, "CDP connection established");

        Ok(Self {
            kind: options.engine,
            debug_port,
            process: Mutex::new(Some(child)),
            browser: Arc::new(browser),
            user_data_dir: options.user_data_dir.clone(),
            user_agent: options.user_agent.clone(),
            locale: options.locale.clone(),
            viewport: options.viewport,
        })
    }

    fn take_process(&self) -> Option<Child> {
        self.process.lock().ok().and_then(|mut p| p.take())
    }
}

#[async_trait]
impl EngineHandle for ChromeEngine {
    async fn new_page(&self) -> EngineResult<Box<dyn PageHandle>> {
        let target_id = self.browser.create_target("about:blank").await?;
        let ws_url = get_target_ws_url(self.debug_port, &target_id).await?;
        let cdp = CdpClient::connect(&ws_url).await?;

        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("DOM").await?;
        cdp.enable_domain("Network").await?;
        cdp.set_user_agent(&self.user_agent, self.locale.as_deref()).await?;
        cdp.set_viewport(self.viewport.0, self.viewport.1).await?;

        debug!(target = %target_id, "Opened page target");

        Ok(Box::new(CdpPage {
            target_id,
            cdp,
            browser: self.browser.clone(),
        }))
    }

    async fn close(&self) -> EngineResult<()> {
        if let Err(e) = self.browser.send_command("Browser.close", json!({})).await {
            debug!(error = %e, "CDP Browser.close failed (may already be closed)");
        }
        if let Some(mut child) = self.take_process() {
            let _ = child.kill().await;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(dir = %self.user_data_dir.display(), error = %e, "Could not remove profile dir");
        }
        info!(browser = self.kind.as_str(), port = self.debug_port, "Browser closed");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        if self.browser.is_closed() {
            return false;
        }
        match self.process.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl Drop for ChromeEngine {
    fn drop(&mut self) {
        if let Some(mut child) = self.take_process() {
            let _ = child.start_kill();
        }
    }
}

/// A page target with its own CDP connection.
pub struct CdpPage {
    target_id: String,
    cdp: CdpClient,
    browser: Arc<CdpClient>,
}

impl CdpPage {
    async fn eval_string(&self, expression: &str) -> EngineResult<String> {
        let value = self.cdp.evaluate_js(expression).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn eval_optional_string(&self, expression: &str) -> EngineResult<Option<String>> {
        let value = self.cdp.evaluate_js(expression).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn goto(&self, url: &str) -> EngineResult<NavigationInfo> {
        let mut loaded = self.cdp.subscribe_event("Page.loadEventFired");
        let mut responses = self.cdp.subscribe_event("Network.responseReceived");

        let result = self.cdp.navigate(url).await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            if !err.is_empty() {
                return Err(EngineError::Navigation(format!("{}: {}", url, err)));
            }
        }

        let mut status = None;
        // Same-document navigations carry no loaderId and fire no load event.
        if let Some(loader_id) = result.get("loaderId").and_then(|v| v.as_str()) {
            loop {
                tokio::select! {
                    Some(event) = responses.recv() => {
                        if document_response_for(&event, loader_id) {
                            status = event
                                .get("response")
                                .and_then(|r| r.get("status"))
                                .and_then(|s| s.as_u64())
                                .map(|s| s as u16);
                        }
                    }
                    event = loaded.recv() => {
                        if event.is_none() {
                            return Err(EngineError::Disconnected(format!(
                                "page closed while loading {}", url
                            )));
                        }
                        break;
                    }
                }
            }
        }

        check_document_status(url, status)?;

        let final_url = self.eval_string("window.location.href").await?;
        Ok(NavigationInfo {
            url: final_url,
            status,
        })
    }

    async fn click(&self, selector: &str) -> EngineResult<()> {
        let js = format!(
            concat!(
                "(function() {{ var el = document.querySelector({});",
                " if (!el) return false;",
                " el.scrollIntoView({{block: 'center'}});",
                " el.click(); return true; }})()"
            ),
            js_string(selector)
        );
        let clicked = self.cdp.evaluate_js(&js).await?.as_bool().unwrap_or(false);
        if !clicked {
            return Err(EngineError::NoSuchElement(selector.to_string()));
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> EngineResult<()> {
        let focus = format!(
            concat!(
                "(function() {{ var el = document.querySelector({});",
                " if (!el) return false;",
                " el.focus();",
                " if ('value' in el) {{ el.value = ''; }} else {{ el.textContent = ''; }}",
                " return true; }})()"
            ),
            js_string(selector)
        );
        let focused = self.cdp.evaluate_js(&focus).await?.as_bool().unwrap_or(false);
        if !focused {
            return Err(EngineError::NoSuchElement(selector.to_string()));
        }

        self.cdp.insert_text(text).await?;

        // Frameworks listen for these rather than for insertText itself.
        self.cdp
            .evaluate_js(concat!(
                "document.activeElement && (",
                "document.activeElement.dispatchEvent(new Event('input', {bubbles: true})),",
                "document.activeElement.dispatchEvent(new Event('change', {bubbles: true})))"
            ))
            .await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> EngineResult<()> {
        let js = format!("!!document.querySelector({})", js_string(selector));
        loop {
            if self.cdp.evaluate_js(&js).await?.as_bool() == Some(true) {
                return Ok(());
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> EngineResult<Value> {
        self.cdp.evaluate_js(script).await
    }

    async fn screenshot(&self, full_page: bool) -> EngineResult<Vec<u8>> {
        let data = self.cdp.screenshot(full_page).await?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| EngineError::Protocol(format!("screenshot base64 decode: {}", e)))
    }

    async fn content(&self) -> EngineResult<String> {
        self.eval_string("document.documentElement ? document.documentElement.outerHTML : ''")
            .await
    }

    async fn title(&self) -> EngineResult<String> {
        self.eval_string("document.title").await
    }

    async fn url(&self) -> EngineResult<String> {
        self.eval_string("window.location.href").await
    }

    async fn text_content(&self, selector: &str) -> EngineResult<Option<String>> {
        let js = format!(
            "(function() {{ var el = document.querySelector({}); if (!el) throw new Error('__no_such_element__'); return el.textContent; }})()",
            js_string(selector)
        );
        self.eval_optional_string(&js)
            .await
            .map_err(|e| missing_element(e, selector))
    }

    async fn get_attribute(&self, selector: &str, name: &str) -> EngineResult<Option<String>> {
        let js = format!(
            "(function() {{ var el = document.querySelector({}); if (!el) throw new Error('__no_such_element__'); return el.getAttribute({}); }})()",
            js_string(selector),
            js_string(name)
        );
        self.eval_optional_string(&js)
            .await
            .map_err(|e| missing_element(e, selector))
    }

    async fn close(&self) -> EngineResult<()> {
        self.browser.close_target(&self.target_id).await
    }
}

/// Quote a value as a JavaScript string literal.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn missing_element(err: EngineError, selector: &str) -> EngineError {
    match err {
        EngineError::Script(msg) if msg.contains("__no_such_element__") => {
            EngineError::NoSuchElement(selector.to_string())
        }
        other => other,
    }
}

fn document_response_for(event: &Value, loader_id: &str) -> bool {
    event.get("type").and_then(|t| t.as_str()) == Some("Document")
        && event.get("loaderId").and_then(|l| l.as_str()) == Some(loader_id)
}

/// Redirects are followed before the document response arrives, so only 2xx is a success.
fn check_document_status(url: &str, status: Option<u16>) -> EngineResult<()> {
    match status {
        Some(code) if !(200..300).contains(&code) => Err(EngineError::Navigation(format!(
            "{} responded with HTTP {}",
            url, code
        ))),
        _ => Ok(()),
    }
}

/// Build Chromium command line arguments.
fn build_browser_args(options: &LaunchOptions, debug_port: u16) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", options.user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(locale) = &options.locale {
        args.push(format!("--lang={}", locale));
    }
    args.push(format!(
        "--window-size={},{}",
        options.viewport.0, options.viewport.1
    ));
    args.extend(options.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: EngineKind) -> Option<String> {
    let candidates = match engine {
        EngineKind::Chrome => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome",
                    "google-chrome-stable",
                    "chromium",
                    "chromium-browser",
                    "/usr/bin/google-chrome",
                    "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        EngineKind::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// All supported engines found on this machine.
pub fn list_available_browsers() -> Vec<(EngineKind, String)> {
    [EngineKind::Chrome, EngineKind::Edge]
        .into_iter()
        .filter_map(|engine| find_browser_binary(engine).map(|path| (engine, path)))
        .collect()
}

async fn find_free_port() -> EngineResult<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the browser-level WebSocket URL shows up.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> EngineResult<String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(EngineError::Launch(format!(
                "CDP endpoint not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
async fn get_target_ws_url(port: u16, target_id: &str) -> EngineResult<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let targets: Vec<Value> = match reqwest::get(&url).await {
            Ok(resp) => match resp.json().await {
                Ok(t) => t,
                Err(_) => continue,
            },
            Err(_) => continue,
        };

        let found = targets.iter().find_map(|target| {
            (target.get("id").and_then(|v| v.as_str()) == Some(target_id))
                .then(|| target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
                .flatten()
        });
        if let Some(ws_url) = found {
            return Ok(ws_url.to_string());
        }
    }

    warn!(port, target = target_id, "Page target never appeared in /json/list");
    Err(EngineError::Launch(format!(
        "no WebSocket URL found for target '{}'",
        target_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LaunchOptions {
        LaunchOptions {
            engine: EngineKind::Chrome,
            executable_path: None,
            headless: true,
            user_agent: "test-agent".to_string(),
            locale: Some("en-US".to_string()),
            viewport: (800, 600),
            launch_timeout: Duration::from_secs(5),
            extra_args: vec!["--no-sandbox".to_string()],
            user_data_dir: PathBuf::from("/tmp/profile"),
        }
    }

    #[test]
    fn test_build_browser_args() {
        let args = build_browser_args(&options(), 9333);
        assert_eq!(args[0], "--remote-debugging-port=9333");
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=800,600".to_string()));
        assert!(args.contains(&"--lang=en-US".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_headed_args() {
        let mut opts = options();
        opts.headless = false;
        let args = build_browser_args(&opts, 9333);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a'b\"c"), r#""a'b\"c""#);
        assert_eq!(js_string("#id > .x"), "\"#id > .x\"");
    }

    #[test]
    fn test_document_response_match() {
        let event = json!({"type": "Document", "loaderId": "L1", "response": {"status": 200}});
        assert!(document_response_for(&event, "L1"));
        assert!(!document_response_for(&event, "L2"));
        let image = json!({"type": "Image", "loaderId": "L1"});
        assert!(!document_response_for(&image, "L1"));
    }

    #[test]
    fn test_document_status() {
        assert!(check_document_status("https://a.example/", Some(200)).is_ok());
        assert!(check_document_status("https://a.example/", Some(204)).is_ok());
        assert!(check_document_status("about:blank", None).is_ok());
        for code in [301, 304, 404, 500] {
            let err = check_document_status("https://a.example/", Some(code)).unwrap_err();
            assert!(matches!(err, EngineError::Navigation(m) if m.contains(&code.to_string())));
        }
    }

    #[test]
    fn test_missing_element_mapping() {
        let err = missing_element(
            EngineError::Script("Error: __no_such_element__".into()),
            "#gone",
        );
        assert!(matches!(err, EngineError::NoSuchElement(s) if s == "#gone"));
        let err = missing_element(EngineError::Script("TypeError".into()), "#x");
        assert!(matches!(err, EngineError::Script(_)));
    }
}
