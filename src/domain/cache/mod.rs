//! Cache domain - keys, entry options and diagnostics

mod key;
mod options;
mod pattern;

pub use key::{CacheKeyGenerator, CacheKeyParams, DefaultKeyGenerator};
pub use options::{preload_delay, CacheStats, Priority, SetOptions, DEFAULT_TTL, PRELOAD_FRACTION};
pub use pattern::KeyPattern;
