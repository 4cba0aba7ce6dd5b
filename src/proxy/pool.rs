//! Connection reuse settings handed to the upstream transport.

use std::time::Duration;

/// Idle connection pooling for the upstream client. There is no retry policy:
/// a failed exchange is reported to the client once.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Idle timeout for pooled connections.
    pub pool_idle_timeout: Duration,
    /// Max idle connections per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 2,
        }
    }
}
