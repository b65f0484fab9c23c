use thiserror::Error;

/// Errors surfaced by the query layer
///
/// Errors are `Clone` because a single failed operation is delivered to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Fetch failed: {message}")]
    Fetch {
        message: String,
        status: Option<u16>,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid pattern: {message}")]
    InvalidPattern { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QueryError {
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            status: None,
        }
    }

    pub fn fetch_with_status(status: u16, message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn invalid_pattern(message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Cancellation is not a failure; bindings discard it silently
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP-like status code attached by the fetch function, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error() {
        let error = QueryError::fetch("connection reset");
        assert_eq!(error.to_string(), "Fetch failed: connection reset");
        assert_eq!(error.status(), None);
    }

    #[test]
    fn test_fetch_error_with_status() {
        let error = QueryError::fetch_with_status(503, "service unavailable");
        assert_eq!(error.to_string(), "Fetch failed: service unavailable");
        assert_eq!(error.status(), Some(503));
    }

    #[test]
    fn test_cancelled_is_not_a_fetch_failure() {
        assert!(QueryError::Cancelled.is_cancelled());
        assert!(!QueryError::fetch("boom").is_cancelled());
        assert_eq!(QueryError::Cancelled.status(), None);
    }

    #[test]
    fn test_errors_compare_by_value() {
        assert_eq!(
            QueryError::fetch_with_status(404, "missing"),
            QueryError::fetch_with_status(404, "missing")
        );
        assert_ne!(QueryError::fetch("a"), QueryError::fetch("b"));
    }
}
