//! Error classification.
//!
//! Maps any [`SearchError`] onto an [`ErrorCategory`] that drives retry,
//! fallback and degradation decisions. Classification is total: every
//! input yields a category, and unrecognised failures are
//! [`ErrorCategory::Unknown`].
//!
//! Message matching is case-insensitive and follows a fixed priority
//! order, first match wins:
//!
//! ```text
//! timeout > rate_limit > quota_exceeded > auth > network > validation > service_unavailable > unknown
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection-level failure.
    Network,
    /// Missing or rejected credentials.
    Auth,
    /// Provider throttling.
    RateLimit,
    /// Account quota or billing limit reached.
    QuotaExceeded,
    /// The request itself is malformed.
    Validation,
    /// Provider is down, overloaded or its circuit is open.
    ServiceUnavailable,
    /// The call did not finish in time.
    Timeout,
    /// Nothing matched.
    Unknown,
}

impl ErrorCategory {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Validation => "validation",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a failure of this category is worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::ServiceUnavailable | Self::Timeout
        )
    }

    /// Whether a failure of this category may be answered by a fallback.
    pub fn is_fallback_eligible(self) -> bool {
        self.is_retryable()
    }

    /// Whether a failure of this category lowers the service level.
    pub fn triggers_degradation(self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable | Self::RateLimit | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure together with its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Category assigned by [`classify`].
    pub category: ErrorCategory,
    /// Display message of the original failure.
    pub message: String,
    /// Derived from `category`.
    pub retryable: bool,
}

impl ClassifiedError {
    /// Build a classified error; `retryable` is derived from the category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retryable: category.is_retryable(),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Substring rules in priority order.
const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "etimedout", "deadline exceeded"],
    ),
    (
        ErrorCategory::RateLimit,
        &["rate limit", "rate_limit", "ratelimit", "too many requests", "429"],
    ),
    (
        ErrorCategory::QuotaExceeded,
        &["quota", "insufficient_quota", "billing", "credit balance"],
    ),
    (
        ErrorCategory::Auth,
        &[
            "unauthorized",
            "unauthorised",
            "authentication",
            "api key",
            "api_key",
            "forbidden",
            "permission denied",
            "401",
            "403",
        ],
    ),
    (
        ErrorCategory::Network,
        &[
            "network",
            "econnrefused",
            "econnreset",
            "enotfound",
            "connection",
            "socket",
            "dns",
            "fetch failed",
        ],
    ),
    (
        ErrorCategory::Validation,
        &["validation", "invalid", "bad request", "malformed", "400"],
    ),
    (
        ErrorCategory::ServiceUnavailable,
        &[
            "unavailable",
            "overloaded",
            "internal server error",
            "bad gateway",
            "500",
            "502",
            "503",
            "504",
        ],
    ),
];

/// Classify a raw failure message.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Classify a [`SearchError`].
///
/// Variants whose meaning is fixed by construction are mapped directly;
/// everything else goes through [`classify_message`].
pub fn classify(error: &SearchError) -> ClassifiedError {
    let message = error.to_string();
    let category = match error {
        SearchError::Timeout(_) => ErrorCategory::Timeout,
        SearchError::CircuitOpen { .. } | SearchError::Degraded { .. } => {
            ErrorCategory::ServiceUnavailable
        }
        SearchError::Config(_) => ErrorCategory::Validation,
        SearchError::Backend(_)
        | SearchError::AllProvidersFailed(_)
        | SearchError::Ranking(_) => classify_message(&message),
    };
    ClassifiedError::new(category, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::degradation::ServiceLevel;

    #[test]
    fn each_category_matches_its_keywords() {
        let cases = [
            ("request timed out after 5s", ErrorCategory::Timeout),
            ("HTTP 429 Too Many Requests", ErrorCategory::RateLimit),
            ("insufficient_quota for this month", ErrorCategory::QuotaExceeded),
            ("401 Unauthorized", ErrorCategory::Auth),
            ("ECONNREFUSED 127.0.0.1:5432", ErrorCategory::Network),
            ("validation failed: empty query", ErrorCategory::Validation),
            ("503 Service Unavailable", ErrorCategory::ServiceUnavailable),
            ("something odd happened", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify_message(message), expected, "message: {message}");
        }
    }

    #[test]
    fn priority_order_resolves_overlaps() {
        // timeout beats network
        assert_eq!(
            classify_message("connection timed out"),
            ErrorCategory::Timeout
        );
        // rate_limit beats quota
        assert_eq!(
            classify_message("rate limit reached for quota tier"),
            ErrorCategory::RateLimit
        );
        // quota beats auth
        assert_eq!(
            classify_message("quota exceeded for api key"),
            ErrorCategory::QuotaExceeded
        );
        // auth beats validation
        assert_eq!(
            classify_message("invalid api key"),
            ErrorCategory::Auth
        );
        // network beats service_unavailable
        assert_eq!(
            classify_message("network unreachable, upstream unavailable"),
            ErrorCategory::Network
        );
        // validation beats service_unavailable
        assert_eq!(
            classify_message("invalid payload, server returned 500"),
            ErrorCategory::Validation
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify_message("TIMEOUT"), ErrorCategory::Timeout);
        assert_eq!(classify_message("Forbidden"), ErrorCategory::Auth);
    }

    #[test]
    fn empty_message_is_unknown() {
        assert_eq!(classify_message(""), ErrorCategory::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let err = SearchError::backend("socket hang up");
        assert_eq!(classify(&err), classify(&err));
    }

    #[test]
    fn typed_variants_map_directly() {
        assert_eq!(
            classify(&SearchError::Timeout("slow".into())).category,
            ErrorCategory::Timeout
        );
        assert_eq!(
            classify(&SearchError::CircuitOpen {
                service: "api".into()
            })
            .category,
            ErrorCategory::ServiceUnavailable
        );
        assert_eq!(
            classify(&SearchError::Degraded {
                required: ServiceLevel::FullService,
                current: ServiceLevel::EmergencyMode,
            })
            .category,
            ErrorCategory::ServiceUnavailable
        );
        // Config messages may mention "timeout" but are still operator errors.
        assert_eq!(
            classify(&SearchError::Config("timeout_ms must be > 0".into())).category,
            ErrorCategory::Validation
        );
    }

    #[test]
    fn backend_errors_use_message_rules() {
        let classified = classify(&SearchError::backend("502 Bad Gateway"));
        assert_eq!(classified.category, ErrorCategory::ServiceUnavailable);
        assert!(classified.retryable);
        assert!(classified.message.contains("502"));
    }

    #[test]
    fn retryable_is_derived_from_category() {
        assert!(ClassifiedError::new(ErrorCategory::Network, "x").retryable);
        assert!(ClassifiedError::new(ErrorCategory::Timeout, "x").retryable);
        assert!(ClassifiedError::new(ErrorCategory::RateLimit, "x").retryable);
        assert!(ClassifiedError::new(ErrorCategory::ServiceUnavailable, "x").retryable);
        assert!(!ClassifiedError::new(ErrorCategory::Auth, "x").retryable);
        assert!(!ClassifiedError::new(ErrorCategory::Validation, "x").retryable);
        assert!(!ClassifiedError::new(ErrorCategory::QuotaExceeded, "x").retryable);
        assert!(!ClassifiedError::new(ErrorCategory::Unknown, "x").retryable);
    }

    #[test]
    fn degradation_triggers() {
        assert!(ErrorCategory::Timeout.triggers_degradation());
        assert!(ErrorCategory::RateLimit.triggers_degradation());
        assert!(ErrorCategory::ServiceUnavailable.triggers_degradation());
        assert!(!ErrorCategory::Network.triggers_degradation());
        assert!(!ErrorCategory::Auth.triggers_degradation());
    }

    #[test]
    fn classified_display_includes_category() {
        let err = ClassifiedError::new(ErrorCategory::RateLimit, "slow down");
        assert_eq!(err.to_string(), "[rate_limit] slow down");
    }
}
