pub mod cache;
pub mod handler;
pub mod queries;
pub mod types;
pub mod validate;

use crate::config::AnalyticsConfig;
use cache::AnalyticsCache;
use deadpool_sqlite::Pool;
use std::time::Duration;

/// Shared state for analytics endpoints. The cache is owned here, created at
/// service startup and torn down with it.
pub struct AnalyticsState {
    pub pool: Pool,
    pub cache: AnalyticsCache,
    pub config: AnalyticsConfig,
}

impl AnalyticsState {
    pub fn new(pool: Pool, config: AnalyticsConfig) -> Self {
        Self {
            pool,
            cache: AnalyticsCache::new(),
            config,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }
}
