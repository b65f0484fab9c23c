//! Query domain - consumer-facing state, options and fetch functions

mod data;
mod fetcher;
mod lifecycle;
mod options;
mod state;

pub use data::QueryData;
pub use fetcher::{fetcher, FetchFuture, Fetcher};
pub use lifecycle::LifecycleEvent;
pub use options::{QueryOptions, RequestOptions};
pub use state::{QueryState, QueryStatus};
