pub mod pool;
pub mod realtime;
pub mod relay;
pub mod reminder;
pub mod telephony;

// Re-export commonly used types for convenience
pub use pool::{PoolConfig, PoolError, PoolStats, UpstreamPool};
pub use realtime::{OpenAIConnector, RealtimeConfig, RealtimeError, UpstreamConnector, UpstreamSession};
pub use relay::{RelayContext, RelaySession, RelayState, SessionRegistry};
