use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::domain::QueryError;

/// Future returned by a fetch function
pub type FetchFuture<T> = BoxFuture<'static, Result<T, QueryError>>;

/// Caller-supplied fetch operation; the transport behind it is opaque
pub type Fetcher<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Wraps an async closure into a [`Fetcher`]
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}
