//! Configuration for the hub process

use std::time::Duration;

/// Tunables for dispatch, aggregation, and memoization
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a pending correlation waits for its full result set
    pub aggregation_timeout: Duration,

    /// TTL for memoized aggregated results
    pub cache_ttl: Duration,

    /// How many times an unknown-correlation message may be requeued before
    /// it is routed to the dead-letter queue
    pub max_redeliveries: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            aggregation_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60 * 60 * 48), // 2 days
            max_redeliveries: 16,
        }
    }
}

impl HubConfig {
    pub fn with_aggregation_timeout(mut self, timeout: Duration) -> Self {
        self.aggregation_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_redeliveries(mut self, max: u32) -> Self {
        self.max_redeliveries = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.aggregation_timeout, Duration::from_secs(10));
        assert_eq!(config.max_redeliveries, 16);
    }

    #[test]
    fn test_builders() {
        let config = HubConfig::default()
            .with_aggregation_timeout(Duration::from_millis(50))
            .with_cache_ttl(Duration::from_secs(1))
            .with_max_redeliveries(2);
        assert_eq!(config.aggregation_timeout, Duration::from_millis(50));
        assert_eq!(config.cache_ttl, Duration::from_secs(1));
        assert_eq!(config.max_redeliveries, 2);
    }
}
