//! Resilience and search configuration with sensible defaults.
//!
//! Every struct is `serde`-deserialisable with `#[serde(default)]` so a
//! partial TOML section only overrides the fields it names. Call
//! `validate()` (or construct through a component's `new`, which does it
//! for you) before use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Retry with exponential backoff and jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Fraction of the delay used as symmetric random jitter, in `[0, 1]`.
    pub jitter_factor: f64,
    /// Per-attempt timeout in milliseconds. `0` disables the bound.
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            timeout_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.max_retries > 10 {
            return Err(SearchError::Config("max_retries must be <= 10".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(SearchError::Config(
                "retry base_delay_ms must be <= max_delay_ms".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SearchError::Config(
                "backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SearchError::Config(
                "jitter_factor must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Per-attempt timeout, if enabled.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Rolling-window circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within one monitor window that trip the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a half-open trial is admitted.
    pub recovery_timeout_ms: u64,
    /// Length of the failure-counting window.
    pub monitor_window_ms: u64,
    /// Calls that must be seen in the window before the circuit may trip.
    pub minimum_throughput: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            monitor_window_ms: 300_000,
            minimum_throughput: 10,
            success_threshold: 3,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.failure_threshold == 0 {
            return Err(SearchError::Config(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(SearchError::Config(
                "success_threshold must be greater than 0".into(),
            ));
        }
        if self.monitor_window_ms == 0 {
            return Err(SearchError::Config(
                "monitor_window_ms must be greater than 0".into(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(SearchError::Config(
                "half_open_max_calls must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// What a [`crate::resilience::FallbackManager`] does once every provider
/// in its chain has missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Return the last provider error.
    FailFast,
    /// Serve any cached value, even a stale one, or fail.
    Cached,
    /// Call every provider once, concurrently, and merge the answers; stale
    /// cache when too few answered.
    Partial,
    /// Stale cache, then static fallback, then empty.
    Graceful,
    /// Return an empty value.
    Silent,
}

impl std::fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FailFast => "fail_fast",
            Self::Cached => "cached",
            Self::Partial => "partial",
            Self::Graceful => "graceful",
            Self::Silent => "silent",
        };
        f.write_str(name)
    }
}

/// Fallback chain and last-good cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Resolution strategy once the provider chain is exhausted.
    pub mode: FallbackMode,
    /// Whether last-good values are cached and served.
    pub enable_caching: bool,
    /// Default cache TTL; the sweep runs every quarter of this.
    pub cache_retention_ms: u64,
    /// Maximum cached entries before oldest-inserted eviction.
    pub max_cache_size: usize,
    /// Bound on a single fallback provider call.
    pub fallback_timeout_ms: u64,
    /// Whether partial results may be synthesised.
    pub enable_partial_results: bool,
    /// Minimum `successful / total` provider ratio for a partial result.
    pub partial_results_threshold: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            mode: FallbackMode::Graceful,
            enable_caching: true,
            cache_retention_ms: 3_600_000,
            max_cache_size: 1_000,
            fallback_timeout_ms: 10_000,
            enable_partial_results: true,
            partial_results_threshold: 0.5,
        }
    }
}

impl FallbackConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.max_cache_size == 0 {
            return Err(SearchError::Config(
                "max_cache_size must be greater than 0".into(),
            ));
        }
        if self.cache_retention_ms == 0 {
            return Err(SearchError::Config(
                "cache_retention_ms must be greater than 0".into(),
            ));
        }
        if self.fallback_timeout_ms == 0 {
            return Err(SearchError::Config(
                "fallback_timeout_ms must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.partial_results_threshold) {
            return Err(SearchError::Config(
                "partial_results_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Default time-to-live for cached values.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_retention_ms)
    }

    /// Interval of the background expiry sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis((self.cache_retention_ms / 4).max(1))
    }

    /// Bound on one provider call in the fallback chain.
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}

/// Everything a [`crate::resilience::FaultTolerantExecutor`] needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry policy.
    pub retry: RetryConfig,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Fallback chain settings.
    pub fallback: FallbackConfig,
    /// Background provider health poll.
    pub health_check: HealthCheckConfig,
}

impl ResilienceConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), SearchError> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.fallback.validate()?;
        self.health_check.validate()
    }
}

/// Background health poll settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Whether the poll task is started with the executor's background tasks.
    pub enabled: bool,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

impl HealthCheckConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.enabled && self.interval_ms == 0 {
            return Err(SearchError::Config(
                "health check interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Orchestrator-level search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result count used when a request does not name one.
    pub default_max_results: usize,
    /// Minimum similarity used when a request does not name one.
    pub default_threshold: f64,
    /// Collapse the same document returned by several sources.
    pub deduplicate: bool,
    /// TTL of the enhanced-search result cache in seconds. `0` disables it.
    pub result_cache_ttl_secs: u64,
    /// Capacity of the enhanced-search result cache.
    pub result_cache_capacity: u64,
    /// How many recent per-source errors are retained for diagnostics.
    pub max_recent_errors: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            default_threshold: 0.0,
            deduplicate: true,
            result_cache_ttl_secs: 300,
            result_cache_capacity: 100,
            max_recent_errors: 50,
        }
    }
}

impl SearchConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.default_max_results == 0 {
            return Err(SearchError::Config(
                "default_max_results must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_threshold) {
            return Err(SearchError::Config(
                "default_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resilience_config_is_valid() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.fallback.mode, FallbackMode::Graceful);
        assert_eq!(config.health_check.interval_ms, 30_000);
    }

    #[test]
    fn inverted_delay_range_rejected() {
        let config = RetryConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 100,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn shrinking_multiplier_rejected() {
        let config = RetryConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn jitter_outside_unit_interval_rejected() {
        let config = RetryConfig {
            jitter_factor: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("jitter_factor"));
    }

    #[test]
    fn zero_timeout_disables_attempt_bound() {
        let config = RetryConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.attempt_timeout().is_none());
        assert_eq!(
            RetryConfig::default().attempt_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn zero_failure_threshold_rejected() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn partial_threshold_outside_unit_interval_rejected() {
        let config = FallbackConfig {
            partial_results_threshold: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sweep_runs_every_quarter_of_retention() {
        let config = FallbackConfig {
            cache_retention_ms: 4_000,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_millis(1_000));
        assert_eq!(config.cache_ttl(), Duration::from_millis(4_000));
    }

    #[test]
    fn resilience_validation_reaches_nested_sections() {
        let config = ResilienceConfig {
            fallback: FallbackConfig {
                max_cache_size: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_cache_size"));
    }

    #[test]
    fn disabled_health_check_may_have_zero_interval() {
        let config = HealthCheckConfig {
            enabled: false,
            interval_ms: 0,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fallback_mode_serde_uses_snake_case() {
        let json = serde_json::to_string(&FallbackMode::FailFast).expect("serialize");
        assert_eq!(json, "\"fail_fast\"");
        let mode: FallbackMode = serde_json::from_str("\"graceful\"").expect("deserialize");
        assert_eq!(mode, FallbackMode::Graceful);
        assert_eq!(FallbackMode::Silent.to_string(), "silent");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: ResilienceConfig =
            serde_json::from_str(r#"{"retry": {"max_retries": 1}}"#).expect("deserialize");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
    }

    #[test]
    fn search_config_rejects_zero_results() {
        let config = SearchConfig {
            default_max_results: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_max_results"));
        assert!(SearchConfig::default().validate().is_ok());
    }
}
