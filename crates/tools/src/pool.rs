//! Session pool and connection-scoped session manager.
//!
//! A pool owns up to `size` browser sessions. Callers wait on a fair
//! semaphore for a permit, then take the least recently used idle session or
//! launch a new one. The returned `SessionLease` gives exclusive access and
//! hands the session back when dropped.

use crate::browser::engine::{BrowserLauncher, LaunchOptions};
use crate::browser::session::{BrowserSession, SessionInfo};
use crate::content::ContentLimits;
use browser_mcp_core::config::{Config, PoolConfig, PoolScope};
use browser_mcp_core::{Error, Paths, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds new browser sessions from configuration.
#[derive(Clone)]
pub struct SessionFactory {
    launcher: Arc<dyn BrowserLauncher>,
    config: Arc<Config>,
    paths: Paths,
}

impl SessionFactory {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: Arc<Config>, paths: Paths) -> Self {
        Self {
            launcher,
            config,
            paths,
        }
    }

    pub async fn create(&self) -> Result<BrowserSession> {
        let id = format!("session-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let options = LaunchOptions::from_config(&self.config.browser, self.paths.profile_dir(&id));
        // The launcher polls for readiness itself; this only catches a hung spawn.
        let deadline = options.launch_timeout + Duration::from_secs(5);
        let launch = BrowserSession::launch(
            id.clone(),
            self.launcher.as_ref(),
            &options,
            self.config.timeouts.clone(),
            ContentLimits::from(&self.config.tools),
        );
        match tokio::time::timeout(deadline, launch).await {
            Ok(result) => result,
            Err(_) => Err(Error::EngineFatal(format!(
                "browser for {} did not start within {}s",
                id,
                deadline.as_secs()
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub name: String,
    pub size: usize,
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub closed: bool,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<BrowserSession>,
    busy: HashMap<String, SessionInfo>,
    closed: bool,
    /// Set once shutdown has closed the idle set; late returns are closed directly.
    drained: bool,
}

struct PoolInner {
    name: String,
    size: usize,
    factory: SessionFactory,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    returned: Notify,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, mut session: BrowserSession) {
        let id = session.id().to_string();
        let to_close = {
            let mut state = self.state();
            state.busy.remove(&id);
            if session.is_broken() {
                warn!(pool = %self.name, session = %id, "Discarding broken browser session");
                Some(session)
            } else if state.drained {
                Some(session)
            } else {
                session.touch();
                state.idle.push_back(session);
                None
            }
        };
        self.returned.notify_waiters();

        if let Some(session) = to_close {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(session.close());
                }
                // Engine handles kill their processes on drop.
                Err(_) => drop(session),
            }
        }
    }
}

/// A bounded pool of browser sessions.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(name: impl Into<String>, pool: &PoolConfig, factory: SessionFactory) -> Self {
        let size = pool.size.max(1);
        let shutdown_grace = factory.config.timeouts.shutdown_grace();
        let inner = Arc::new(PoolInner {
            name: name.into(),
            size,
            factory,
            permits: Arc::new(Semaphore::new(size)),
            state: Mutex::new(PoolState::default()),
            returned: Notify::new(),
            cancel: CancellationToken::new(),
            shutdown_grace,
        });

        if pool.idle_timeout_secs > 0 && tokio::runtime::Handle::try_current().is_ok() {
            spawn_reaper(
                Arc::downgrade(&inner),
                inner.cancel.clone(),
                Duration::from_secs(pool.idle_timeout_secs),
                Duration::from_secs(pool.reap_interval_secs.max(1)),
            );
        }

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    /// Token cancelled when the pool shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Wait for a free slot and take a session, launching one if none is idle.
    pub async fn acquire(&self) -> Result<SessionLease> {
        if self.is_closed() {
            return Err(shutdown_error());
        }

        let permit = tokio::select! {
            _ = self.inner.cancel.cancelled() => return Err(shutdown_error()),
            permit = self.inner.permits.clone().acquire_owned() => {
                permit.map_err(|_| shutdown_error())?
            }
        };

        let reused = {
            let mut state = self.inner.state();
            if state.closed {
                return Err(shutdown_error());
            }
            let session = state.idle.pop_front();
            if let Some(s) = &session {
                state.busy.insert(s.id().to_string(), s.info(true));
            }
            session
        };

        let session = match reused {
            Some(session) if session.is_broken() => {
                self.inner.state().busy.remove(session.id());
                warn!(pool = %self.inner.name, session = %session.id(), "Idle session died, replacing");
                tokio::spawn(session.close());
                self.launch_session().await?
            }
            Some(session) => session,
            None => self.launch_session().await?,
        };

        debug!(pool = %self.inner.name, session = %session.id(), "Session leased");
        Ok(SessionLease {
            session: Some(session),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    async fn launch_session(&self) -> Result<BrowserSession> {
        let session = tokio::select! {
            _ = self.inner.cancel.cancelled() => return Err(shutdown_error()),
            session = self.inner.factory.create() => session?,
        };

        let mut state = self.inner.state();
        if state.closed {
            drop(state);
            tokio::spawn(session.close());
            return Err(shutdown_error());
        }
        state.busy.insert(session.id().to_string(), session.info(true));
        Ok(session)
    }

    /// Launch sessions until the pool is full.
    pub async fn warmup(&self) -> Result<()> {
        let mut leases = Vec::with_capacity(self.inner.size);
        for _ in 0..self.inner.size {
            leases.push(self.acquire().await?);
        }
        info!(pool = %self.inner.name, sessions = leases.len(), "Pool warmed up");
        Ok(())
    }

    /// Close idle sessions unused for at least `max_idle`. Returns how many closed.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        reap(&self.inner, max_idle).await
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state();
        let mut sessions: Vec<SessionInfo> = state.busy.values().cloned().collect();
        sessions.extend(state.idle.iter().map(|s| s.info(false)));
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        PoolStats {
            name: self.inner.name.clone(),
            size: self.inner.size,
            live: state.busy.len() + state.idle.len(),
            idle: state.idle.len(),
            busy: state.busy.len(),
            closed: state.closed,
            sessions,
        }
    }

    /// Cancel in-flight work, wait for leases to come back, close everything.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        info!(pool = %self.inner.name, "Shutting down session pool");
        self.inner.cancel.cancel();
        self.inner.permits.close();

        let inner = &self.inner;
        let drained = tokio::time::timeout(inner.shutdown_grace, async {
            loop {
                let notified = inner.returned.notified();
                let all_returned = inner.state().busy.is_empty();
                if all_returned {
                    break;
                }
                notified.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                pool = %inner.name,
                busy = inner.state().busy.len(),
                "Shutdown grace period elapsed with sessions still leased"
            );
        }

        let idle: Vec<BrowserSession> = {
            let mut state = inner.state();
            state.drained = true;
            state.idle.drain(..).collect()
        };
        for session in idle {
            session.close().await;
        }
        info!(pool = %inner.name, "Session pool closed");
    }
}

fn shutdown_error() -> Error {
    Error::Shutdown("session pool is shutting down".to_string())
}

async fn reap(inner: &PoolInner, max_idle: Duration) -> usize {
    let expired: Vec<BrowserSession> = {
        let mut state = inner.state();
        let (expired, keep): (Vec<_>, Vec<_>) = state
            .idle
            .drain(..)
            .partition(|s| s.idle_for() >= max_idle || s.is_broken());
        state.idle = keep.into();
        expired
    };
    let count = expired.len();
    for session in expired {
        info!(
            pool = %inner.name,
            session = %session.id(),
            idle_secs = session.idle_for().as_secs(),
            "Closing idle browser session"
        );
        session.close().await;
    }
    count
}

fn spawn_reaper(
    inner: Weak<PoolInner>,
    cancel: CancellationToken,
    max_idle: Duration,
    interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let Some(inner) = inner.upgrade() else { break };
            reap(&inner, max_idle).await;
        }
        debug!("Idle reaper stopped");
    });
}

/// Exclusive use of one session; returns it to the pool on drop.
pub struct SessionLease {
    session: Option<BrowserSession>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    /// Resolves when the owning pool starts shutting down.
    pub fn cancellation(&self) -> CancellationToken {
        self.pool.cancel.clone()
    }
}

impl Deref for SessionLease {
    type Target = BrowserSession;

    fn deref(&self) -> &BrowserSession {
        self.session.as_ref().expect("lease holds its session until dropped")
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut BrowserSession {
        self.session.as_mut().expect("lease holds its session until dropped")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

/// The pool a single client connection should use.
#[derive(Clone)]
pub struct ConnectionScope {
    pub id: String,
    pub pool: SessionPool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub scope: PoolScope,
    pub connections: usize,
    pub pools: Vec<PoolStats>,
}

/// Hands out pools to connections according to `pool.scope`.
pub struct SessionManager {
    config: PoolConfig,
    factory: SessionFactory,
    shared: SessionPool,
    connections: Mutex<HashMap<String, SessionPool>>,
}

impl SessionManager {
    pub fn new(config: &Config, factory: SessionFactory) -> Self {
        let shared = SessionPool::new("shared", &config.pool, factory.clone());
        Self {
            config: config.pool.clone(),
            factory,
            shared,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, SessionPool>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_connect(&self, connection_id: &str) -> ConnectionScope {
        let pool = match self.config.scope {
            PoolScope::Shared => self.shared.clone(),
            PoolScope::PerConnection => {
                let mut connections = self.connections();
                connections
                    .entry(connection_id.to_string())
                    .or_insert_with(|| {
                        debug!(connection = connection_id, "Creating per-connection pool");
                        SessionPool::new(
                            format!("conn-{}", connection_id),
                            &self.config,
                            self.factory.clone(),
                        )
                    })
                    .clone()
            }
        };
        ConnectionScope {
            id: connection_id.to_string(),
            pool,
        }
    }

    pub async fn on_disconnect(&self, connection_id: &str) {
        let pool = self.connections().remove(connection_id);
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }

    pub async fn warmup(&self) -> Result<()> {
        if self.config.warmup && self.config.scope == PoolScope::Shared {
            self.shared.warmup().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> ManagerStats {
        let connections = self.connections();
        let mut pools = vec![self.shared.stats()];
        pools.extend(connections.values().map(|p| p.stats()));
        ManagerStats {
            scope: self.config.scope,
            connections: connections.len(),
            pools,
        }
    }

    pub async fn shutdown(&self) {
        let pools: Vec<SessionPool> = self.connections().drain().map(|(_, p)| p).collect();
        let mut all = vec![self.shared.clone()];
        all.extend(pools);
        futures::future::join_all(all.iter().map(|p| p.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use browser_mcp_core::ErrorKind;
    use std::time::Instant;

    fn factory(engine: &FakeEngine, tweak: impl FnOnce(&mut Config)) -> (SessionFactory, Config) {
        let mut config = Config::default();
        config.timeouts.shutdown_grace_ms = 500;
        config.pool.idle_timeout_secs = 0;
        tweak(&mut config);
        let paths = Paths::with_base(std::env::temp_dir().join("browser-mcp-pool-tests"));
        (
            SessionFactory::new(Arc::new(engine.clone()), Arc::new(config.clone()), paths),
            config,
        )
    }

    fn pool(engine: &FakeEngine, size: usize) -> SessionPool {
        let (factory, config) = factory(engine, |c| c.pool.size = size);
        SessionPool::new("test", &config.pool, factory)
    }

    #[tokio::test]
    async fn test_lazy_launch_and_reuse() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 1);
        assert_eq!(engine.launches(), 0);

        let first_id = {
            let lease = pool.acquire().await.unwrap();
            assert_eq!(pool.stats().busy, 1);
            lease.id().to_string()
        };
        let stats = pool.stats();
        assert_eq!((stats.live, stats.idle, stats.busy), (1, 1, 0));

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.id(), first_id);
        assert_eq!(engine.launches(), 1);
    }

    #[tokio::test]
    async fn test_single_session_serializes_callers() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 1);

        let first = pool.acquire().await.unwrap();
        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let _lease = pool2.acquire().await.unwrap();
            started.elapsed()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());
        drop(first);

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_millis(100));
        assert_eq!(engine.launches(), 1);
    }

    #[tokio::test]
    async fn test_bounded_pool_and_lru_reuse() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 2);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let (a_id, b_id) = (a.id().to_string(), b.id().to_string());
        assert_eq!(engine.launches(), 2);

        drop(a);
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(b);

        // a has been idle longest
        let next = pool.acquire().await.unwrap();
        assert_eq!(next.id(), a_id);
        let other = pool.acquire().await.unwrap();
        assert_eq!(other.id(), b_id);
        assert_eq!(engine.launches(), 2);
        assert_eq!(pool.stats().live, 2);
    }

    #[tokio::test]
    async fn test_fifo_waiters() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 1);
        let held = pool.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for i in 0..3 {
            let pool = pool.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _lease = pool.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(held);
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_broken_session_replaced() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 1);

        let dead_id = {
            let mut lease = pool.acquire().await.unwrap();
            engine.kill();
            let err = lease.navigate("https://example.com/").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EngineFatalError);
            lease.id().to_string()
        };
        assert_eq!(pool.stats().live, 0);

        let lease = pool.acquire().await.unwrap();
        assert_ne!(lease.id(), dead_id);
        assert_eq!(engine.launches(), 2);
    }

    #[tokio::test]
    async fn test_launch_failure_releases_permit() {
        let engine = FakeEngine::new();
        engine.set_fail_launch(true);
        let pool = pool(&engine, 1);
        let err = pool.acquire().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::EngineFatalError);

        engine.set_fail_launch(false);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_closes() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 1);

        let worker_pool = pool.clone();
        let worker = tokio::spawn(async move {
            let mut lease = worker_pool.acquire().await?;
            let token = lease.cancellation();
            tokio::select! {
                _ = token.cancelled() => Err(shutdown_error()),
                r = lease.wait_for("#never", Duration::from_secs(30)) => r,
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.pending_waits(), 1);

        pool.shutdown().await;
        let err = worker.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShutdownError);
        assert_eq!(engine.pending_waits(), 0);
        assert_eq!(engine.open_engines(), 0);
        assert_eq!(engine.open_pages(), 0);

        let err = pool.acquire().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ShutdownError);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_acquirers() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 1);
        let held = pool.acquire().await.unwrap();

        let waiting_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiting_pool.acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown_pool = pool.clone();
        let shutdown = tokio::spawn(async move { shutdown_pool.shutdown().await });
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShutdownError);

        drop(held);
        shutdown.await.unwrap();
        assert_eq!(engine.open_engines(), 0);
    }

    #[tokio::test]
    async fn test_reap_idle() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(pool.reap_idle(Duration::from_secs(60)).await, 0);
        assert_eq!(pool.reap_idle(Duration::from_millis(10)).await, 2);
        assert_eq!(pool.stats().live, 0);
        assert_eq!(engine.open_engines(), 0);
    }

    #[tokio::test]
    async fn test_background_reaper() {
        let engine = FakeEngine::new();
        let (factory, config) = factory(&engine, |c| {
            c.pool.idle_timeout_secs = 1;
            c.pool.reap_interval_secs = 1;
        });
        let pool = SessionPool::new("reaped", &config.pool, factory);
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.stats().idle, 1);

        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(engine.open_engines(), 0);
    }

    #[tokio::test]
    async fn test_warmup_fills_pool() {
        let engine = FakeEngine::new();
        let pool = pool(&engine, 3);
        pool.warmup().await.unwrap();
        let stats = pool.stats();
        assert_eq!((stats.live, stats.idle), (3, 3));
        assert_eq!(stats.sessions.len(), 3);
    }

    #[tokio::test]
    async fn test_manager_shared_scope() {
        let engine = FakeEngine::new();
        let (factory, config) = factory(&engine, |_| {});
        let manager = SessionManager::new(&config, factory);
        let a = manager.on_connect("a");
        let b = manager.on_connect("b");
        assert_eq!(a.pool.name(), "shared");
        assert_eq!(b.pool.name(), "shared");
        assert_eq!(manager.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_manager_per_connection_scope() {
        let engine = FakeEngine::new();
        let (factory, config) = factory(&engine, |c| c.pool.scope = PoolScope::PerConnection);
        let manager = SessionManager::new(&config, factory);

        let a = manager.on_connect("a");
        let b = manager.on_connect("b");
        assert_ne!(a.pool.name(), b.pool.name());
        assert_eq!(manager.on_connect("a").pool.name(), a.pool.name());

        drop(a.pool.acquire().await.unwrap());
        assert_eq!(engine.open_engines(), 1);

        manager.on_disconnect("a").await;
        assert!(a.pool.is_closed());
        assert!(!b.pool.is_closed());
        assert_eq!(engine.open_engines(), 0);
        assert_eq!(manager.stats().connections, 1);

        manager.shutdown().await;
        assert!(b.pool.is_closed());
    }
}
