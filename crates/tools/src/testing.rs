//! In-memory engine for tests.
//!
//! Pages share one scripted DOM. The engine counts open handles, in-flight
//! operations and pending waits so tests can assert on resource hygiene and
//! serialization without a real browser.

use crate::browser::engine::{
    BrowserLauncher, EngineError, EngineHandle, EngineResult, LaunchOptions, NavigationInfo,
    PageHandle,
};
use async_trait::async_trait;
use browser_mcp_core::config::BrowserConfig;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);

pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

#[derive(Debug, Clone, Default)]
struct FakeElement {
    text: String,
    attrs: HashMap<String, String>,
    visible_at: Option<Instant>,
}

impl FakeElement {
    fn visible(&self) -> bool {
        self.visible_at.map_or(true, |at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct World {
    elements: HashMap<String, FakeElement>,
    failing_urls: HashSet<String>,
    hanging_clicks: HashSet<String>,
    script_results: HashMap<String, Value>,
    html: Option<String>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
}

#[derive(Default)]
struct FakeState {
    world: Mutex<World>,
    handles: Mutex<Vec<Arc<AtomicBool>>>,
    launches: AtomicUsize,
    open_engines: AtomicUsize,
    open_pages: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pending_waits: AtomicUsize,
    fail_launch: AtomicBool,
    op_delay_ms: AtomicUsize,
    launch_delay_ms: AtomicUsize,
}

/// Counts an operation as in flight until dropped.
struct OpGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> OpGuard<'a> {
    fn enter(counter: &'a AtomicUsize, max: Option<&AtomicUsize>) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = max {
            max.fetch_max(now, Ordering::SeqCst);
        }
        Self { counter }
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions::from_config(
            &BrowserConfig::default(),
            std::env::temp_dir().join("browser-mcp-fake-profile"),
        )
    }

    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.state.world.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_element(&self, selector: &str) {
        self.add_element_with(selector, "", &[]);
    }

    pub fn add_element_with(&self, selector: &str, text: &str, attrs: &[(&str, &str)]) {
        self.world().elements.insert(
            selector.to_string(),
            FakeElement {
                text: text.to_string(),
                attrs: attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                visible_at: None,
            },
        );
    }

    /// The element starts matching `after` from now.
    pub fn add_element_after(&self, selector: &str, after: Duration) {
        self.world().elements.insert(
            selector.to_string(),
            FakeElement {
                visible_at: Some(Instant::now() + after),
                ..FakeElement::default()
            },
        );
    }

    pub fn fail_navigation(&self, url: &str) {
        self.world().failing_urls.insert(url.to_string());
    }

    /// Clicks on `selector` never complete.
    pub fn hang_clicks_on(&self, selector: &str) {
        self.world().hanging_clicks.insert(selector.to_string());
    }

    pub fn set_script_result(&self, script: &str, value: Value) {
        self.world().script_results.insert(script.to_string(), value);
    }

    pub fn set_html(&self, html: &str) {
        self.world().html = Some(html.to_string());
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.state.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Every click and fill takes at least this long.
    pub fn set_op_delay(&self, delay: Duration) {
        self.state
            .op_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        self.state
            .launch_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Simulate every currently running browser crashing.
    pub fn kill(&self) {
        if let Ok(handles) = self.state.handles.lock() {
            for alive in handles.iter() {
                alive.store(false, Ordering::SeqCst);
            }
        }
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn open_engines(&self) -> usize {
        self.state.open_engines.load(Ordering::SeqCst)
    }

    pub fn open_pages(&self) -> usize {
        self.state.open_pages.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_ops(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn pending_waits(&self) -> usize {
        self.state.pending_waits.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> Vec<String> {
        self.world().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.world().fills.clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeEngine {
    async fn launch(&self, _options: &LaunchOptions) -> EngineResult<Box<dyn EngineHandle>> {
        let delay = self.state.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(EngineError::Launch("fake browser refused to start".to_string()));
        }
        let alive = Arc::new(AtomicBool::new(true));
        if let Ok(mut handles) = self.state.handles.lock() {
            handles.push(alive.clone());
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        self.state.open_engines.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngineHandle {
            engine: self.clone(),
            alive,
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeEngineHandle {
    engine: FakeEngine,
    alive: Arc<AtomicBool>,
    closed: AtomicBool,
}

#[async_trait]
impl EngineHandle for FakeEngineHandle {
    async fn new_page(&self) -> EngineResult<Box<dyn PageHandle>> {
        if !self.is_alive() {
            return Err(EngineError::Disconnected("fake browser is gone".to_string()));
        }
        self.engine.state.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            engine: self.engine.clone(),
            alive: self.alive.clone(),
            url: Mutex::new("about:blank".to_string()),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> EngineResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.state.open_engines.fetch_sub(1, Ordering::SeqCst);
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

struct FakePage {
    engine: FakeEngine,
    alive: Arc<AtomicBool>,
    url: Mutex<String>,
    closed: AtomicBool,
}

impl FakePage {
    fn check_alive(&self) -> EngineResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Disconnected("fake browser is gone".to_string()))
        }
    }

    fn current_url(&self) -> String {
        self.url.lock().map(|u| u.clone()).unwrap_or_default()
    }

    fn element(&self, selector: &str) -> Option<FakeElement> {
        self.engine
            .world()
            .elements
            .get(selector)
            .filter(|e| e.visible())
            .cloned()
    }

    async fn op_delay(&self) {
        let delay = self.engine.state.op_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
    }
}

#[async_trait]
impl PageHandle for FakePage {
    async fn goto(&self, url: &str) -> EngineResult<NavigationInfo> {
        self.check_alive()?;
        let state = &self.engine.state;
        let _op = OpGuard::enter(&state.in_flight, Some(&state.max_in_flight));
        if self.engine.world().failing_urls.contains(url) {
            return Err(EngineError::Navigation(format!("{}: net::ERR_NAME_NOT_RESOLVED", url)));
        }
        if let Ok(mut current) = self.url.lock() {
            *current = url.to_string();
        }
        Ok(NavigationInfo {
            url: url.to_string(),
            status: Some(200),
        })
    }

    async fn click(&self, selector: &str) -> EngineResult<()> {
        self.check_alive()?;
        let state = &self.engine.state;
        let _op = OpGuard::enter(&state.in_flight, Some(&state.max_in_flight));
        let _wait = OpGuard::enter(&state.pending_waits, None);
        if self.element(selector).is_none() {
            return Err(EngineError::NoSuchElement(selector.to_string()));
        }
        if self.engine.world().hanging_clicks.contains(selector) {
            std::future::pending::<()>().await;
        }
        self.op_delay().await;
        self.engine.world().clicks.push(selector.to_string());
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> EngineResult<()> {
        self.check_alive()?;
        let state = &self.engine.state;
        let _op = OpGuard::enter(&state.in_flight, Some(&state.max_in_flight));
        if self.element(selector).is_none() {
            return Err(EngineError::NoSuchElement(selector.to_string()));
        }
        self.op_delay().await;
        let mut world = self.engine.world();
        if let Some(el) = world.elements.get_mut(selector) {
            el.attrs.insert("value".to_string(), text.to_string());
        }
        world.fills.push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> EngineResult<()> {
        let _wait = OpGuard::enter(&self.engine.state.pending_waits, None);
        loop {
            self.check_alive()?;
            if self.element(selector).is_some() {
                return Ok(());
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> EngineResult<Value> {
        self.check_alive()?;
        if script.trim_start().starts_with("throw") {
            return Err(EngineError::Script(format!("Uncaught Error: {}", script)));
        }
        Ok(self
            .engine
            .world()
            .script_results
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn screenshot(&self, _full_page: bool) -> EngineResult<Vec<u8>> {
        self.check_alive()?;
        Ok(FAKE_PNG.to_vec())
    }

    async fn content(&self) -> EngineResult<String> {
        self.check_alive()?;
        let html = self.engine.world().html.clone();
        Ok(html.unwrap_or_else(|| {
            format!(
                "<html><head><title>Fake</title></head><body><p>Fake page at {}</p>\
                 <a href=\"https://example.com/more\">More</a></body></html>",
                self.current_url()
            )
        }))
    }

    async fn title(&self) -> EngineResult<String> {
        self.check_alive()?;
        Ok(format!("Fake: {}", self.current_url()))
    }

    async fn url(&self) -> EngineResult<String> {
        self.check_alive()?;
        Ok(self.current_url())
    }

    async fn text_content(&self, selector: &str) -> EngineResult<Option<String>> {
        self.check_alive()?;
        self.element(selector)
            .map(|e| Some(e.text))
            .ok_or_else(|| EngineError::NoSuchElement(selector.to_string()))
    }

    async fn get_attribute(&self, selector: &str, name: &str) -> EngineResult<Option<String>> {
        self.check_alive()?;
        self.element(selector)
            .map(|e| e.attrs.get(name).cloned())
            .ok_or_else(|| EngineError::NoSuchElement(selector.to_string()))
    }

    async fn close(&self) -> EngineResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.state.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
