//! press-query
//!
//! Client-side data fetching and caching for a content-publishing client:
//! - Bounded TTL cache with priority eviction and preload signals
//! - At most one in-flight request per key, with linear-backoff retry
//! - Stale-while-revalidate query bindings driven by focus, polling and timers
//! - Mutation bindings with success/error/settled callbacks

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{
    fetcher, CacheKeyGenerator, CacheKeyParams, DefaultKeyGenerator, Fetcher, KeyPattern,
    MutationState, Priority, QueryData, QueryError, QueryOptions, QueryState, QueryStatus,
    RequestOptions, SetOptions,
};
pub use infrastructure::cache::{CacheStore, CacheStoreConfig};
pub use infrastructure::coordinator::RequestCoordinator;
pub use infrastructure::mutation::{mutation_fn, MutationBinding, MutationOptions};
pub use infrastructure::query::{DirectRequest, FocusManager, QueryBinding, QueryClient};
pub use infrastructure::subscription::Subscription;
