//! Pre-warmed pool of upstream realtime sessions.
//!
//! Opening an upstream session costs a TLS handshake plus the provider's own
//! session setup. The pool keeps a small set of already-open sessions so a new
//! call can start talking immediately.
//!
//! # Behavior
//!
//! - [`UpstreamPool::warm`] opens sessions in the background until the idle set
//!   plus in-flight opens reaches the requested size. A session joins the idle
//!   set only after its handshake succeeded; failed handshakes are retried
//!   after a backoff.
//! - [`UpstreamPool::acquire`] pops the most recently warmed session (LIFO) and
//!   falls back to opening one on demand. It never waits for a warm-up.
//! - [`UpstreamPool::release`] puts an open session back while the pool is
//!   below its target size, and drops it otherwise.
//! - A session that closes while idle is removed and replaced exactly once.
//!
//! The idle set is guarded by a `parking_lot::Mutex` that is never held across
//! an `.await`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::realtime::{
    BackoffConfig, ReadyState, RealtimeError, UpstreamConnector, UpstreamSession,
};

/// Default bound on a single handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by [`UpstreamPool::acquire`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Upstream pool is shut down")]
    ShutDown,

    #[error(transparent)]
    Upstream(#[from] RealtimeError),
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of idle sessions to keep warm
    pub target_size: usize,
    /// Bound on one handshake
    pub handshake_timeout: Duration,
    /// Idle sessions older than this are discarded instead of handed out
    pub idle_ttl: Option<Duration>,
    /// Retry policy for failed warm-up handshakes
    pub backoff: BackoffConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_size: 1,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_ttl: None,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Point-in-time pool counters for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub target_size: usize,
    pub idle: usize,
    pub pending: usize,
    pub opened_total: u64,
    pub discarded_total: u64,
}

struct IdleEntry {
    session: UpstreamSession,
    /// Cancels the closed-while-idle watcher once the entry leaves the idle set
    watcher: CancellationToken,
}

#[derive(Default)]
struct PoolState {
    /// LIFO: the most recently warmed session is at the end
    idle: Vec<IdleEntry>,
    /// Opens in flight, counted toward the warm target
    pending: usize,
}

struct PoolInner {
    connector: Arc<dyn UpstreamConnector>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    shutdown: CancellationToken,
    opened_total: AtomicU64,
    discarded_total: AtomicU64,
}

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct UpstreamPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for UpstreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl UpstreamPool {
    pub fn new(connector: Arc<dyn UpstreamConnector>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                state: Mutex::new(PoolState::default()),
                shutdown: CancellationToken::new(),
                opened_total: AtomicU64::new(0),
                discarded_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Ensure at least `n` sessions are idle or being opened.
    ///
    /// Returns immediately; the missing sessions are opened on background tasks.
    pub fn warm(&self, n: usize) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let missing = {
            let mut state = self.inner.state.lock();
            let missing = n.saturating_sub(state.idle.len() + state.pending);
            state.pending += missing;
            missing
        };

        if missing > 0 {
            debug!(missing, target = n, "Warming upstream sessions");
        }
        for _ in 0..missing {
            self.spawn_open();
        }
    }

    /// Take a session for a call.
    ///
    /// Pops the most recently warmed idle session. Idle sessions that closed or
    /// outlived the idle TTL are dropped on the way. When nothing usable is
    /// idle, a session is opened on demand. Either way the pool is topped back
    /// up to its target size in the background.
    pub async fn acquire(&self) -> PoolResult<UpstreamSession> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }

        if let Some(mut session) = self.take_idle() {
            let stale = session.drain_pending();
            debug!(session_id = %session.id(), stale, "Acquired warm upstream session");
            self.warm(self.inner.config.target_size);
            return Ok(session);
        }

        debug!("No warm upstream session, opening on demand");
        self.warm(self.inner.config.target_size);
        let session = self.inner.open_once().await?;
        Ok(session)
    }

    /// Return a session after its call ended.
    ///
    /// Open sessions have their call-bound flags cleared and go back to the idle
    /// set, as long as idle plus in-flight opens stay below the target size.
    /// Anything else is closed and dropped.
    pub fn release(&self, mut session: UpstreamSession) {
        if !session.is_open() || self.inner.shutdown.is_cancelled() {
            debug!(session_id = %session.id(), state = %session.ready_state(), "Discarding released session");
            self.discard(session);
            return;
        }

        session.reset_for_reuse();
        session.drain_pending();
        match self.push_idle(session, Some(self.inner.config.target_size)) {
            Ok(()) => debug!("Session returned to pool"),
            Err(session) => {
                debug!(session_id = %session.id(), "Pool at target size, closing released session");
                self.discard(session);
            }
        }
    }

    /// Close and drop a session without pooling it.
    pub fn discard(&self, session: UpstreamSession) {
        self.inner.discarded_total.fetch_add(1, Ordering::Relaxed);
        drop(session);
    }

    /// Cancel pending opens and close every idle session.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<IdleEntry> = {
            let mut state = self.inner.state.lock();
            std::mem::take(&mut state.idle)
        };
        info!(closed = drained.len(), "Upstream pool shut down");
        for entry in drained {
            entry.watcher.cancel();
        }
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending
    }

    pub fn stats(&self) -> PoolStats {
        let (idle, pending) = {
            let state = self.inner.state.lock();
            (state.idle.len(), state.pending)
        };
        PoolStats {
            target_size: self.inner.config.target_size,
            idle,
            pending,
            opened_total: self.inner.opened_total.load(Ordering::Relaxed),
            discarded_total: self.inner.discarded_total.load(Ordering::Relaxed),
        }
    }

    fn take_idle(&self) -> Option<UpstreamSession> {
        let ttl = self.inner.config.idle_ttl;
        let mut stale = Vec::new();

        let found = {
            let mut state = self.inner.state.lock();
            let mut found = None;
            while let Some(entry) = state.idle.pop() {
                entry.watcher.cancel();
                let expired = ttl.is_some_and(|ttl| entry.session.age() > ttl);
                if entry.session.is_open() && !expired {
                    found = Some(entry.session);
                    break;
                }
                stale.push(entry.session);
            }
            found
        };

        for session in stale {
            debug!(session_id = %session.id(), "Dropping stale idle session");
            self.discard(session);
        }
        found
    }

    /// Add a session to the idle set. With a `cap`, the session is handed
    /// back when idle plus pending already reaches it.
    fn push_idle(&self, session: UpstreamSession, cap: Option<usize>) -> Result<(), UpstreamSession> {
        let watcher = self.inner.shutdown.child_token();
        let id = session.id().to_string();
        let mut ready = session.ready_watch();

        {
            let mut state = self.inner.state.lock();
            if cap.is_some_and(|cap| state.idle.len() + state.pending >= cap) {
                return Err(session);
            }
            state.idle.push(IdleEntry {
                session,
                watcher: watcher.clone(),
            });
        }

        let pool = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.cancelled() => {}
                _ = ready.wait_for(|s| *s == ReadyState::Closed) => {
                    if pool.remove_idle(&id) {
                        warn!(session_id = %id, "Idle upstream session closed, opening replacement");
                        pool.replace_one();
                    }
                }
            }
        });
        Ok(())
    }

    /// Remove an idle entry by id. Returns whether it was still idle.
    fn remove_idle(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            state
                .idle
                .iter()
                .position(|e| e.session.id() == id)
                .map(|pos| state.idle.remove(pos))
        };
        match removed {
            Some(entry) => {
                self.discard(entry.session);
                true
            }
            None => false,
        }
    }

    fn replace_one(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.state.lock().pending += 1;
        self.spawn_open();
    }

    /// Open one session for the idle set. The caller has already counted it
    /// in `pending`.
    fn spawn_open(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            let backoff = pool.inner.config.backoff.clone();
            let mut attempt: u32 = 0;

            loop {
                let result = tokio::select! {
                    _ = pool.inner.shutdown.cancelled() => break,
                    result = pool.inner.open_once() => result,
                };

                match result {
                    Ok(session) => {
                        pool.inner.state.lock().pending -= 1;
                        if pool.inner.shutdown.is_cancelled() {
                            pool.discard(session);
                        } else {
                            debug!(session_id = %session.id(), "Warm upstream session ready");
                            // Already counted in pending, so no cap applies
                            let _ = pool.push_idle(session, None);
                        }
                        return;
                    }
                    Err(e) => {
                        attempt += 1;
                        if !backoff.should_retry(attempt) {
                            warn!(attempt, "Giving up on warm upstream session: {}", e);
                            break;
                        }
                        let delay = backoff.calculate_delay(attempt);
                        warn!(attempt, delay_ms = delay, "Warm upstream handshake failed: {}", e);

                        tokio::select! {
                            _ = pool.inner.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        }
                    }
                }
            }

            pool.inner.state.lock().pending -= 1;
        });
    }
}

impl PoolInner {
    /// One handshake bounded by the configured timeout.
    async fn open_once(&self) -> Result<UpstreamSession, RealtimeError> {
        let timeout = self.config.handshake_timeout;
        let session = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| {
                RealtimeError::Timeout(format!("upstream handshake exceeded {timeout:?}"))
            })??;
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::{RealtimeResult, ServerEvent, UpstreamPeer};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Hands out in-memory sessions and keeps their peers alive.
    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail_first: usize,
        delay: Option<Duration>,
        peers: Mutex<Vec<UpstreamPeer>>,
    }

    #[async_trait]
    impl UpstreamConnector for FakeConnector {
        async fn connect(&self) -> RealtimeResult<UpstreamSession> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if n < self.fail_first {
                return Err(RealtimeError::ConnectionFailed("refused".to_string()));
            }
            let (session, peer) = UpstreamSession::pair(format!("fake-{n}"));
            self.peers.lock().push(peer);
            Ok(session)
        }
    }

    fn pool_with(connector: Arc<FakeConnector>, target_size: usize) -> UpstreamPool {
        UpstreamPool::new(
            connector,
            PoolConfig {
                target_size,
                handshake_timeout: Duration::from_millis(200),
                idle_ttl: None,
                backoff: BackoffConfig::fixed(10),
            },
        )
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_warm_fills_to_target() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector.clone(), 3);

        pool.warm(3);
        wait_until(|| pool.idle_count() == 3).await;
        assert_eq!(pool.pending_count(), 0);

        // Already warm: nothing new is opened
        pool.warm(3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_acquire_is_lifo() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector, 2);

        let (a, _peer_a) = UpstreamSession::pair("a");
        let (b, _peer_b) = UpstreamSession::pair("b");
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle_count(), 2);

        assert_eq!(pool.acquire().await.unwrap().id(), "b");
        assert_eq!(pool.acquire().await.unwrap().id(), "a");
    }

    #[tokio::test]
    async fn test_acquire_on_empty_pool_opens_on_demand() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector.clone(), 0);

        let session = pool.acquire().await.unwrap();
        assert!(session.is_open());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_does_not_wait_for_warm_up() {
        let connector = Arc::new(FakeConnector {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let pool = pool_with(connector.clone(), 2);
        pool.warm(2);

        // Warm opens are in flight; acquire opens its own session rather than
        // waiting on them.
        let session = pool.acquire().await.unwrap();
        assert!(session.is_open());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_acquire_tops_up_pool() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector.clone(), 2);
        pool.warm(2);
        wait_until(|| pool.idle_count() == 2).await;

        let _session = pool.acquire().await.unwrap();
        wait_until(|| pool.idle_count() == 2).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_acquire_drains_stale_events() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector, 1);

        let (session, peer) = UpstreamSession::pair("s");
        pool.release(session);
        peer.events.send(ServerEvent::Unknown).await.unwrap();

        let mut session = pool.acquire().await.unwrap();
        assert_eq!(session.drain_pending(), 0);
    }

    #[tokio::test]
    async fn test_release_open_session_resets_flags() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector, 1);

        let (mut session, _peer) = UpstreamSession::pair("s");
        session.mark_configured();
        pool.release(session);
        assert_eq!(pool.idle_count(), 1);

        let session = pool.acquire().await.unwrap();
        assert!(!session.configured());
    }

    #[tokio::test]
    async fn test_release_beyond_target_discards() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector, 1);
        pool.warm(1);
        wait_until(|| pool.idle_count() == 1).await;

        // A burst of concurrent calls, some served on demand
        let mut sessions = Vec::new();
        for _ in 0..3 {
            sessions.push(pool.acquire().await.unwrap());
        }
        wait_until(|| pool.idle_count() == 1 && pool.pending_count() == 0).await;

        for session in sessions {
            pool.release(session);
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.stats().discarded_total, 3);
    }

    #[tokio::test]
    async fn test_release_with_room_keeps_session() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector, 2);

        let (session, _peer) = UpstreamSession::pair("kept");
        pool.release(session);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.acquire().await.unwrap().id(), "kept");
    }

    #[tokio::test]
    async fn test_release_closed_session_discards() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector.clone(), 0);

        let (session, peer) = UpstreamSession::pair("closed");
        peer.close();
        pool.release(session);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().discarded_total, 1);

        // Never handed out again
        let next = pool.acquire().await.unwrap();
        assert_ne!(next.id(), "closed");
    }

    #[tokio::test]
    async fn test_idle_close_triggers_one_replacement() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector.clone(), 1);
        pool.warm(1);
        wait_until(|| pool.idle_count() == 1).await;

        let peer = connector.peers.lock().pop().unwrap();
        peer.close();

        wait_until(|| connector.connects.load(Ordering::SeqCst) == 2 && pool.idle_count() == 1)
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_retried() {
        let connector = Arc::new(FakeConnector {
            fail_first: 2,
            ..Default::default()
        });
        let pool = pool_with(connector.clone(), 1);
        pool.warm(1);

        wait_until(|| pool.idle_count() == 1).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(pool.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let connector = Arc::new(FakeConnector {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let pool = pool_with(connector, 0);

        match pool.acquire().await {
            Err(PoolError::Upstream(RealtimeError::Timeout(_))) => {}
            other => panic!("Expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_ttl_evicts_old_sessions() {
        let connector = Arc::new(FakeConnector::default());
        let pool = UpstreamPool::new(
            connector.clone(),
            PoolConfig {
                target_size: 1,
                idle_ttl: Some(Duration::from_millis(1)),
                ..Default::default()
            },
        );

        let (session, _peer) = UpstreamSession::pair("old");
        pool.release(session);
        assert_eq!(pool.idle_count(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id(), "old");
        assert!(connector.connects.load(Ordering::SeqCst) >= 1);
        assert_eq!(pool.stats().discarded_total, 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_pool() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool_with(connector, 2);
        pool.warm(2);
        wait_until(|| pool.idle_count() == 2).await;

        pool.shutdown();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::ShutDown)));

        pool.warm(2);
        assert_eq!(pool.pending_count(), 0);
    }
}
