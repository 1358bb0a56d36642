//! Error types for the ragchat-search crate.
//!
//! Messages are stable and safe to show to operators. Backend errors carry
//! the backend's own message so that [`crate::resilience::classify`] can
//! categorise them; no query text or credentials are ever embedded here.

use crate::resilience::degradation::ServiceLevel;

/// Errors that can occur while executing or orchestrating searches.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// A search backend or fallback provider reported a failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// An operation did not complete within its time budget.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The circuit for a service is open; the call was rejected without
    /// being attempted.
    #[error("circuit open for {service}: service temporarily unavailable")]
    CircuitOpen {
        /// Protected service name.
        service: String,
    },

    /// The current degradation level does not permit this operation.
    #[error("service degraded: operation requires {required}, current level is {current}")]
    Degraded {
        /// Most degraded level at which the operation may still run.
        required: ServiceLevel,
        /// Level at the time of the call.
        current: ServiceLevel,
    },

    /// Every provider in a fallback chain missed or failed.
    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),

    /// A relevance pipeline stage could not produce a score.
    #[error("ranking error: {0}")]
    Ranking(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl SearchError {
    /// Convenience constructor for backend failures.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Returns `true` if this error is a circuit-open fast failure.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Convenience type alias for ragchat-search results.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_backend() {
        let err = SearchError::backend("connection refused");
        assert_eq!(err.to_string(), "backend error: connection refused");
    }

    #[test]
    fn display_timeout() {
        let err = SearchError::Timeout("attempt exceeded 500ms".into());
        assert_eq!(err.to_string(), "operation timed out: attempt exceeded 500ms");
    }

    #[test]
    fn display_circuit_open_names_service() {
        let err = SearchError::CircuitOpen {
            service: "database".into(),
        };
        assert_eq!(
            err.to_string(),
            "circuit open for database: service temporarily unavailable"
        );
        assert!(err.is_circuit_open());
    }

    #[test]
    fn display_degraded_uses_level_names() {
        let err = SearchError::Degraded {
            required: ServiceLevel::FullService,
            current: ServiceLevel::BasicService,
        };
        assert_eq!(
            err.to_string(),
            "service degraded: operation requires full_service, current level is basic_service"
        );
    }

    #[test]
    fn display_config() {
        let err = SearchError::Config("max_retries must be <= 10".into());
        assert_eq!(err.to_string(), "config error: max_retries must be <= 10");
        assert!(!err.is_circuit_open());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SearchError>();
    }
}
