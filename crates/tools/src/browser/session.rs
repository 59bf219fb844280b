//! A browser session: one engine instance plus its current page.
//!
//! Every operation is bounded by a deadline. On expiry the engine future is
//! dropped, which unregisters its pending command, and the session stays
//! usable. A session whose engine connection died is marked broken and the
//! pool discards it on release.

use super::engine::{BrowserLauncher, EngineHandle, EngineResult, LaunchOptions, PageHandle};
use crate::content::{self, ContentFormat, ContentLimits, PageContent};
use browser_mcp_core::config::TimeoutConfig;
use browser_mcp_core::{Error, ErrorKind, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::Instant as Deadline;
use tracing::{debug, info, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct NavigateOutcome {
    pub url: String,
    pub status: Option<u16>,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotOutcome {
    pub path: String,
    pub bytes: usize,
    pub full_page: bool,
}

/// Point-in-time view of a session for pool stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub busy: bool,
}

pub struct BrowserSession {
    id: String,
    engine: Box<dyn EngineHandle>,
    page: Box<dyn PageHandle>,
    timeouts: TimeoutConfig,
    limits: ContentLimits,
    navigated: bool,
    broken: bool,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    last_used: Instant,
}

/// Run `fut` under `deadline`, mapping expiry to `TimeoutError`.
async fn bounded<T, F>(what: &str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout(format!(
            "{} timed out after {}ms",
            what,
            deadline.as_millis()
        ))),
    }
}

/// Like [`bounded`], for a step that shares `budget` with earlier steps.
async fn bounded_until<T, F>(what: &str, expires: Deadline, budget: Duration, fut: F) -> Result<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout_at(expires, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout(format!(
            "{} timed out after {}ms",
            what,
            budget.as_millis()
        ))),
    }
}

impl BrowserSession {
    /// Launch an engine and open its first page.
    pub async fn launch(
        id: String,
        launcher: &dyn BrowserLauncher,
        options: &LaunchOptions,
        timeouts: TimeoutConfig,
        limits: ContentLimits,
    ) -> Result<Self> {
        let started = Instant::now();
        let engine = launcher.launch(options).await?;
        let page = match engine.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = engine.close().await;
                return Err(e.into());
            }
        };
        info!(
            session = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Browser session ready"
        );
        Ok(Self::from_parts(id, engine, page, timeouts, limits))
    }

    pub fn from_parts(
        id: String,
        engine: Box<dyn EngineHandle>,
        page: Box<dyn PageHandle>,
        timeouts: TimeoutConfig,
        limits: ContentLimits,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            engine,
            page,
            timeouts,
            limits,
            navigated: false,
            broken: false,
            created_at: now,
            last_used_at: now,
            last_used: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Broken sessions must not be handed out again.
    pub fn is_broken(&self) -> bool {
        self.broken || !self.engine.is_alive()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn info(&self, busy: bool) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            idle_secs: if busy { 0 } else { self.idle_for().as_secs() },
            busy,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_at = Utc::now();
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.kind() == ErrorKind::EngineFatalError {
                warn!(session = %self.id, error = %e, "Browser session marked broken");
                self.broken = true;
            }
        }
        self.touch();
        result
    }

    fn ensure_navigated(&self) -> Result<()> {
        if self.navigated {
            Ok(())
        } else {
            Err(Error::State(
                "no page loaded yet; call navigate_to_url first".to_string(),
            ))
        }
    }

    pub async fn navigate(&mut self, url: &str) -> Result<NavigateOutcome> {
        debug!(session = %self.id, url, "Navigating");
        let nav = bounded("navigation", self.timeouts.navigation(), self.page.goto(url)).await;
        let nav = self.track(nav)?;
        self.navigated = true;

        let title = bounded("reading title", self.timeouts.script(), self.page.title()).await;
        let title = self.track(title)?;
        Ok(NavigateOutcome {
            url: nav.url,
            status: nav.status,
            title,
        })
    }

    pub async fn get_content(&mut self, format: ContentFormat) -> Result<PageContent> {
        self.ensure_navigated()?;
        let deadline = self.timeouts.script();
        let page = &self.page;
        let fetched = async {
            let html = bounded("reading page content", deadline, page.content()).await?;
            let title = bounded("reading title", deadline, page.title()).await?;
            let url = bounded("reading url", deadline, page.url()).await?;
            Ok::<_, Error>((html, title, url))
        }
        .await;
        let (html, title, url) = self.track(fetched)?;
        Ok(content::extract(&html, title, url, format, &self.limits))
    }

    pub async fn get_title(&mut self) -> Result<String> {
        self.ensure_navigated()?;
        let title = bounded("reading title", self.timeouts.script(), self.page.title()).await;
        self.track(title)
    }

    pub async fn get_url(&mut self) -> Result<String> {
        self.ensure_navigated()?;
        let url = bounded("reading url", self.timeouts.script(), self.page.url()).await;
        self.track(url)
    }

    /// Wait until `expires` for `selector` to match; expiry means the element
    /// never appeared. Locating and the action after it share one budget.
    async fn locate(&mut self, selector: &str, expires: Deadline, budget: Duration) -> Result<()> {
        let found = match tokio::time::timeout_at(expires, self.page.wait_for_selector(selector)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::ElementNotFound(format!(
                "no element matches selector '{}' within {}ms",
                selector,
                budget.as_millis()
            ))),
        };
        self.track(found)
    }

    fn interaction_budget(&self, timeout: Option<Duration>) -> (Deadline, Duration) {
        let budget = timeout.unwrap_or_else(|| self.timeouts.click());
        (Deadline::now() + budget, budget)
    }

    pub async fn click(&mut self, selector: &str, timeout: Option<Duration>) -> Result<()> {
        let (expires, budget) = self.interaction_budget(timeout);
        self.locate(selector, expires, budget).await?;
        let clicked = bounded_until("click", expires, budget, self.page.click(selector)).await;
        self.track(clicked)
    }

    pub async fn fill(&mut self, selector: &str, text: &str, timeout: Option<Duration>) -> Result<()> {
        let (expires, budget) = self.interaction_budget(timeout);
        self.locate(selector, expires, budget).await?;
        let filled = bounded_until("fill", expires, budget, self.page.fill(selector, text)).await;
        self.track(filled)
    }

    pub async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let waited = match tokio::time::timeout(timeout, self.page.wait_for_selector(selector)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout(format!(
                "element '{}' did not appear within {}ms",
                selector,
                timeout.as_millis()
            ))),
        };
        self.track(waited)
    }

    pub async fn evaluate(&mut self, script: &str) -> Result<Value> {
        let value = bounded("script", self.timeouts.script(), self.page.evaluate(script)).await;
        self.track(value)
    }

    pub async fn screenshot(&mut self, path: &str, full_page: bool) -> Result<ScreenshotOutcome> {
        let shot = bounded(
            "screenshot",
            self.timeouts.default_timeout(),
            self.page.screenshot(full_page),
        )
        .await;
        let png = self.track(shot)?;

        let target = Path::new(path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, &png).await?;

        Ok(ScreenshotOutcome {
            path: path.to_string(),
            bytes: png.len(),
            full_page,
        })
    }

    pub async fn get_element_text(
        &mut self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let (expires, budget) = self.interaction_budget(timeout);
        self.locate(selector, expires, budget).await?;
        let text = bounded_until(
            "reading element text",
            expires,
            budget,
            self.page.text_content(selector),
        )
        .await;
        self.track(text)
    }

    pub async fn get_element_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let (expires, budget) = self.interaction_budget(timeout);
        self.locate(selector, expires, budget).await?;
        let value = bounded_until(
            "reading element attribute",
            expires,
            budget,
            self.page.get_attribute(selector, attribute),
        )
        .await;
        self.track(value)
    }

    /// Release the page and the engine. Failures are logged, never returned.
    pub async fn close(self) {
        if let Err(e) = bounded("closing page", CLOSE_TIMEOUT, self.page.close()).await {
            debug!(session = %self.id, error = %e, "Page close failed");
        }
        if let Err(e) = bounded("closing browser", CLOSE_TIMEOUT, self.engine.close()).await {
            warn!(session = %self.id, error = %e, "Browser close failed");
        }
        info!(session = %self.id, "Browser session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    async fn session(engine: &FakeEngine) -> BrowserSession {
        let mut timeouts = TimeoutConfig::default();
        timeouts.click_timeout_ms = 300;
        timeouts.script_timeout_ms = 500;
        timeouts.navigation_timeout_ms = 500;
        BrowserSession::launch(
            "s-1".to_string(),
            engine,
            &engine.launch_options(),
            timeouts,
            ContentLimits::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_state_error_before_navigation() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        let err = s.get_title().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateError);
        let err = s.get_content(ContentFormat::Text).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateError);
    }

    #[tokio::test]
    async fn test_navigate_then_url_roundtrip() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        let out = s.navigate("https://example.com/").await.unwrap();
        assert_eq!(out.url, "https://example.com/");
        assert_eq!(out.status, Some(200));
        assert_eq!(s.get_url().await.unwrap(), "https://example.com/");
        assert_eq!(s.get_title().await.unwrap(), s.get_title().await.unwrap());
    }

    #[tokio::test]
    async fn test_navigation_error() {
        let engine = FakeEngine::new();
        engine.fail_navigation("https://unreachable.invalid/");
        let mut s = session(&engine).await;
        let err = s.navigate("https://unreachable.invalid/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NavigationError);
        assert!(!s.is_broken());
    }

    #[tokio::test]
    async fn test_click_missing_element() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        s.navigate("https://example.com/").await.unwrap();
        let err = s.click("#missing", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ElementNotFoundError);
    }

    #[tokio::test]
    async fn test_stuck_click_is_timeout() {
        let engine = FakeEngine::new();
        engine.add_element("#stuck");
        engine.hang_clicks_on("#stuck");
        let mut s = session(&engine).await;
        let err = s
            .click("#stuck", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert_eq!(engine.pending_waits(), 0);
    }

    #[tokio::test]
    async fn test_slow_locate_and_stuck_click_share_one_timeout() {
        let engine = FakeEngine::new();
        engine.add_element_after("#late", Duration::from_millis(250));
        engine.hang_clicks_on("#late");
        let mut s = session(&engine).await;

        let started = Instant::now();
        let err = s
            .click("#late", Some(Duration::from_millis(400)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
        assert_eq!(engine.pending_waits(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_timeout_then_reuse() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        s.navigate("https://example.com/").await.unwrap();

        let started = Instant::now();
        let err = s
            .wait_for("#never", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(engine.pending_waits(), 0);

        assert!(!s.get_title().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_late_element() {
        let engine = FakeEngine::new();
        engine.add_element_after("#late", Duration::from_millis(50));
        let mut s = session(&engine).await;
        s.wait_for("#late", Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_script_error() {
        let engine = FakeEngine::new();
        engine.set_script_result("1 + 1", serde_json::json!(2));
        let mut s = session(&engine).await;
        let err = s.evaluate("throw new Error('boom')").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScriptError);
        assert_eq!(s.evaluate("1 + 1").await.unwrap(), serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_screenshot_unwritable_path() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        let blocker = std::env::temp_dir().join(format!("bmcp-blocker-{}", std::process::id()));
        std::fs::write(&blocker, b"file").unwrap();
        let path = blocker.join("shot.png");
        let err = s
            .screenshot(&path.display().to_string(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        let _ = std::fs::remove_file(blocker);
    }

    #[tokio::test]
    async fn test_screenshot_written() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        let dir = std::env::temp_dir().join(format!("bmcp-shot-{}", std::process::id()));
        let path = dir.join("nested").join("page.png");
        let out = s.screenshot(&path.display().to_string(), false).await.unwrap();
        assert!(out.bytes > 0);
        assert_eq!(std::fs::read(&path).unwrap().len(), out.bytes);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_dead_engine_marks_broken() {
        let engine = FakeEngine::new();
        let mut s = session(&engine).await;
        engine.kill();
        let err = s.navigate("https://example.com/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineFatalError);
        assert!(s.is_broken());
    }

    #[tokio::test]
    async fn test_close_releases_handles() {
        let engine = FakeEngine::new();
        let s = session(&engine).await;
        assert_eq!(engine.open_engines(), 1);
        assert_eq!(engine.open_pages(), 1);
        s.close().await;
        assert_eq!(engine.open_engines(), 0);
        assert_eq!(engine.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_element_text_and_attribute() {
        let engine = FakeEngine::new();
        engine.add_element_with("#link", "Docs", &[("href", "/docs")]);
        let mut s = session(&engine).await;
        assert_eq!(
            s.get_element_text("#link", None).await.unwrap().as_deref(),
            Some("Docs")
        );
        assert_eq!(
            s.get_element_attribute("#link", "href", None).await.unwrap().as_deref(),
            Some("/docs")
        );
        assert_eq!(s.get_element_attribute("#link", "title", None).await.unwrap(), None);
    }
}
