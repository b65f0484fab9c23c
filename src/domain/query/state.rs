use tokio::time::Instant;

use crate::domain::QueryError;

/// Coarse status derived from a [`QueryState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// State a query binding exposes to its consumer
///
/// `data` and `error` may both be set: a failed background refresh keeps the
/// last good value and reports the error alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<QueryError>,
    pub is_stale: bool,
    /// When `data` was last fetched (or stored, when served from cache)
    pub updated_at: Option<Instant>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_stale: false,
            updated_at: None,
        }
    }
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        if self.loading {
            QueryStatus::Loading
        } else if self.data.is_some() {
            QueryStatus::Success
        } else if self.error.is_some() {
            QueryStatus::Error
        } else {
            QueryStatus::Idle
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Settled means no explicit load is running
    pub fn is_settled(&self) -> bool {
        !self.loading && (self.data.is_some() || self.error.is_some())
    }
}
