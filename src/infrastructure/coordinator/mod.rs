//! Request coordination - one in-flight request per cache key

mod request;

pub(crate) use request::fetch_with_retry;
pub use request::RequestCoordinator;
