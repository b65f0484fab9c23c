use std::time::Duration;

use crate::domain::cache::{Priority, SetOptions};

/// Options for a coordinated request and the cache write that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Extra attempts after the first failure
    pub retry_count: u32,
    /// Base delay; attempt `n + 1` waits `retry_delay * n`
    pub retry_delay: Duration,
    /// Concurrent callers within this window share one request
    pub dedupe_window: Duration,
    /// TTL of the cache entry written on success
    pub ttl: Duration,
    pub priority: Priority,
    pub preload: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_millis(1000),
            dedupe_window: Duration::from_millis(2000),
            ttl: Duration::from_secs(300),
            priority: Priority::default(),
            preload: false,
        }
    }
}

impl RequestOptions {
    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Delay before the attempt following `failed_attempts` failures
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        self.retry_delay.saturating_mul(failed_attempts)
    }

    pub fn set_options(&self) -> SetOptions {
        SetOptions::new(self.ttl)
            .with_priority(self.priority)
            .with_preload(self.preload)
    }
}

/// Options for a query binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub request: RequestOptions,
    /// Age after which data is served as stale and refreshed in the background
    pub stale_time: Duration,
    pub refetch_on_window_focus: bool,
    pub refetch_interval: Option<Duration>,
    /// Disabled bindings never fetch
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            request: RequestOptions::default(),
            stale_time: Duration::from_secs(30),
            refetch_on_window_focus: true,
            refetch_interval: None,
            enabled: true,
        }
    }
}

impl QueryOptions {
    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_refetch_on_window_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_window_focus = enabled;
        self
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Stale time never exceeds the cache TTL
    pub fn effective_stale_time(&self) -> Duration {
        self.stale_time.min(self.request.ttl)
    }

    /// Whether data of the given age should be treated as stale
    ///
    /// A zero stale time makes every value stale as soon as it arrives.
    pub fn is_stale(&self, age: Duration) -> bool {
        let stale_time = self.effective_stale_time();
        stale_time.is_zero() || age > stale_time
    }
}
