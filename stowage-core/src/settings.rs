use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    pub partition_count: u32,
    pub default_quorum: usize,
    /// Upper bound on any caller-supplied quorum wait.
    pub quorum_max_wait: Duration,
    pub cas_max_attempts: usize,
    pub wait_cache_ttl: Duration,
    pub wait_cache_capacity: usize,
    pub peer_timeout: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            partition_count: 16,
            default_quorum: 2,
            quorum_max_wait: Duration::from_secs(5),
            cas_max_attempts: 8,
            wait_cache_ttl: Duration::from_secs(300),
            wait_cache_capacity: 4096,
            peer_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub period: Duration,
    /// Entries younger than this are left to event delivery.
    pub stale_after: Duration,
    pub page_size: usize,
    pub verify_holdings: bool,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            page_size: 256,
            verify_holdings: true,
        }
    }
}
