use crate::domain::QueryError;

/// State a mutation binding exposes; reset at every invocation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<QueryError>,
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

impl<T> MutationState<T> {
    pub(crate) fn started() -> Self {
        Self {
            loading: true,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        !self.loading && self.data.is_some()
    }

    pub fn is_error(&self) -> bool {
        !self.loading && self.error.is_some()
    }
}
