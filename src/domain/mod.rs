//! Domain layer - types and rules shared by the cache, coordinator and bindings

pub mod cache;
pub mod error;
pub mod mutation;
pub mod query;

pub use cache::{
    CacheKeyGenerator, CacheKeyParams, CacheStats, DefaultKeyGenerator, KeyPattern, Priority,
    SetOptions,
};
pub use error::QueryError;
pub use mutation::MutationState;
pub use query::{
    fetcher, FetchFuture, Fetcher, LifecycleEvent, QueryData, QueryOptions, QueryState,
    QueryStatus, RequestOptions,
};
