//! Per-entry options and store diagnostics

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Share of the TTL after which a preload signal fires
pub const PRELOAD_FRACTION: f64 = 0.8;

/// Default TTL for entries written without explicit options
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Eviction rank of a cache entry, always within 1..=10
///
/// Lower priorities are evicted first when the store is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const MAX: Priority = Priority(10);

    /// Creates a priority, clamping out-of-range values
    pub fn new(value: i64) -> Self {
        Self(value.clamp(Self::MIN.0 as i64, Self::MAX.0 as i64) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self::new(value as i64)
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self::new(value as i64)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Options for a single cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOptions {
    /// Hard expiry; zero means the value is already expired
    pub ttl: Duration,
    pub priority: Priority,
    /// Emit a preload signal at 80% of the TTL
    pub preload: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            priority: Priority::default(),
            preload: false,
        }
    }
}

impl SetOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    /// TTL from a signed millisecond count; negative values mean "expired"
    pub fn from_millis(ttl_ms: i64) -> Self {
        Self::new(Duration::from_millis(ttl_ms.max(0) as u64))
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }
}

/// Delay before the preload signal of an entry with the given TTL
pub fn preload_delay(ttl: Duration) -> Duration {
    ttl.mul_f64(PRELOAD_FRACTION)
}

/// Store diagnostics; not meant for control flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, expired or not
    pub items: usize,
    /// Entries past their TTL that have not been swept yet
    pub expired: usize,
    /// Approximate JSON-serialized size of keys and values
    pub approx_bytes: usize,
    pub capacity: usize,
}
