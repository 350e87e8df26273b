//! Shared application state.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::pool::UpstreamPool;
use crate::core::realtime::{OpenAIConnector, RealtimeConfig, RealtimeResult, UpstreamConnector};
use crate::core::relay::{RelayContext, SessionRegistry};
use crate::core::reminder::{
    HttpReminderBackend, LoggingReminderBackend, MarkerReminderHook, ReminderBackend,
    ReminderHook,
};

/// Why a media-stream connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

#[derive(Debug, Default)]
struct ConnectionCounts {
    total: usize,
    per_ip: HashMap<IpAddr, u32>,
}

/// State shared by every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub pool: UpstreamPool,
    pub registry: SessionRegistry,
    pub realtime: Arc<RealtimeConfig>,
    pub hook: Arc<dyn ReminderHook>,
    pub backend: Arc<dyn ReminderBackend>,
    connections: Mutex<ConnectionCounts>,
}

impl AppState {
    /// Build the production state: OpenAI connector, marker hook, and an HTTP
    /// reminder backend when a service URL is configured.
    pub fn new(config: ServerConfig) -> RealtimeResult<Arc<Self>> {
        let realtime = config.realtime_config();
        let connector: Arc<dyn UpstreamConnector> = Arc::new(OpenAIConnector::new(&realtime)?);

        let backend: Arc<dyn ReminderBackend> = match &config.reminder_service_url {
            Some(url) => {
                info!(url = %url, "Reminder directives go to HTTP service");
                Arc::new(HttpReminderBackend::new(url, config.reminder_timeout()))
            }
            None => {
                info!("No reminder service configured, directives are logged only");
                Arc::new(LoggingReminderBackend)
            }
        };

        Ok(Self::with_components(
            config,
            connector,
            Arc::new(MarkerReminderHook),
            backend,
        ))
    }

    /// Build state around explicit collaborators.
    pub fn with_components(
        config: ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
        hook: Arc<dyn ReminderHook>,
        backend: Arc<dyn ReminderBackend>,
    ) -> Arc<Self> {
        let pool = UpstreamPool::new(connector, config.pool_config());
        let realtime = Arc::new(config.realtime_config());
        Arc::new(Self {
            config,
            pool,
            registry: SessionRegistry::new(),
            realtime,
            hook,
            backend,
            connections: Mutex::new(ConnectionCounts::default()),
        })
    }

    /// Collaborators handed to each relay.
    pub fn relay_context(&self) -> RelayContext {
        RelayContext {
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            realtime: self.realtime.clone(),
            hook: self.hook.clone(),
            backend: self.backend.clone(),
        }
    }

    /// Reserve a media-stream slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let mut counts = self.connections.lock();
        if let Some(max) = self.config.max_websocket_connections {
            if counts.total >= max {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }
        let per_ip = counts.per_ip.get(&ip).copied().unwrap_or(0);
        if per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        counts.total += 1;
        counts.per_ip.insert(ip, per_ip + 1);
        Ok(())
    }

    /// Free a slot taken by [`Self::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let mut counts = self.connections.lock();
        counts.total = counts.total.saturating_sub(1);
        if let Some(n) = counts.per_ip.get_mut(&ip) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                counts.per_ip.remove(&ip);
            }
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.connections.lock().total
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.connections
            .lock()
            .per_ip
            .get(ip)
            .copied()
            .unwrap_or(0)
    }
}

/// Releases a connection slot when dropped.
pub struct ConnectionGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionGuard {
    pub fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self { state, ip }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}
