//! Graceful-degradation level tracking.
//!
//! A single [`DegradationTracker`] is created by the application at startup
//! and shared (via `Arc`) with every executor. Failures that indicate
//! provider stress raise the level; successes and healthy health-check
//! polls lower it again. Operations declare the most degraded level at
//! which they may still run.
//!
//! ```text
//! full_service(0) < reduced_functionality(1) < basic_service(2) < minimal_service(3) < emergency_mode(4)
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Ordered service level. Higher is more degraded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLevel {
    /// Everything available.
    #[default]
    FullService,
    /// Optional features switched off.
    ReducedFunctionality,
    /// Core features only.
    BasicService,
    /// Bare minimum.
    MinimalService,
    /// Only operations that tolerate anything.
    EmergencyMode,
}

impl ServiceLevel {
    /// All levels in ascending order.
    pub const ALL: [ServiceLevel; 5] = [
        Self::FullService,
        Self::ReducedFunctionality,
        Self::BasicService,
        Self::MinimalService,
        Self::EmergencyMode,
    ];

    /// Numeric level in `0..=4`.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Level for a number, saturating at [`ServiceLevel::EmergencyMode`].
    pub fn from_u8(level: u8) -> Self {
        Self::ALL[usize::from(level.min(4))]
    }

    /// Stable snake_case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::FullService => "full_service",
            Self::ReducedFunctionality => "reduced_functionality",
            Self::BasicService => "basic_service",
            Self::MinimalService => "minimal_service",
            Self::EmergencyMode => "emergency_mode",
        }
    }
}

impl fmt::Display for ServiceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationStatus {
    /// Numeric level in `0..=4`.
    pub level: u8,
    /// Name of the level.
    pub level_name: String,
    /// Most recent reasons since the last full recovery, oldest first.
    pub reasons: Vec<String>,
}

/// Reasons kept by [`DegradationTracker::new`].
pub const DEFAULT_MAX_REASONS: usize = 50;

#[derive(Debug, Default)]
struct TrackerState {
    level: ServiceLevel,
    reasons: VecDeque<String>,
}

/// Shared service-level indicator.
#[derive(Debug)]
pub struct DegradationTracker {
    state: Mutex<TrackerState>,
    max_reasons: usize,
}

impl Default for DegradationTracker {
    fn default() -> Self {
        Self::with_max_reasons(DEFAULT_MAX_REASONS)
    }
}

impl DegradationTracker {
    /// Create a tracker at [`ServiceLevel::FullService`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that keeps at most `max_reasons` reasons, dropping
    /// the oldest first. Zero keeps none.
    pub fn with_max_reasons(max_reasons: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            max_reasons,
        }
    }

    /// Record a degradation.
    ///
    /// With `level`, the current level becomes `max(current, level)`;
    /// without, it rises by one step, capped at emergency mode. The reason
    /// is always appended; past the cap the oldest reason is dropped.
    pub fn degrade(&self, reason: impl Into<String>, level: Option<ServiceLevel>) -> ServiceLevel {
        let reason = reason.into();
        let mut state = self.lock();
        let previous = state.level;
        state.level = match level {
            Some(target) => previous.max(target),
            None => ServiceLevel::from_u8(previous.as_u8().saturating_add(1)),
        };
        if state.level != previous {
            tracing::warn!(
                from = %previous,
                to = %state.level,
                reason = %reason,
                "service level degraded"
            );
        }
        state.reasons.push_back(reason);
        while state.reasons.len() > self.max_reasons {
            state.reasons.pop_front();
        }
        state.level
    }

    /// Lower the level by `steps`, flooring at full service. Reaching full
    /// service clears the reason log.
    pub fn recover(&self, steps: u8) -> ServiceLevel {
        let mut state = self.lock();
        let previous = state.level;
        state.level = ServiceLevel::from_u8(previous.as_u8().saturating_sub(steps));
        if state.level == ServiceLevel::FullService {
            state.reasons.clear();
        }
        if state.level != previous {
            tracing::info!(from = %previous, to = %state.level, "service level recovered");
        }
        state.level
    }

    /// Return to full service and forget all reasons.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = TrackerState::default();
    }

    /// Current level.
    pub fn level(&self) -> ServiceLevel {
        self.lock().level
    }

    /// Returns `true` when any degradation is in effect.
    pub fn is_degraded(&self) -> bool {
        self.level() > ServiceLevel::FullService
    }

    /// An operation tagged `required` may run while the current level is
    /// no worse than `required`.
    pub fn can_perform_operation(&self, required: ServiceLevel) -> bool {
        self.level() <= required
    }

    /// Snapshot of level and reasons.
    pub fn status(&self) -> DegradationStatus {
        let state = self.lock();
        DegradationStatus {
            level: state.level.as_u8(),
            level_name: state.level.name().to_string(),
            reasons: state.reasons.iter().cloned().collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_full_service() {
        let tracker = DegradationTracker::new();
        let status = tracker.status();
        assert_eq!(status.level, 0);
        assert_eq!(status.level_name, "full_service");
        assert!(status.reasons.is_empty());
        assert!(!tracker.is_degraded());
    }

    #[test]
    fn degrade_without_level_steps_up_and_caps() {
        let tracker = DegradationTracker::new();
        for i in 1..=6u8 {
            let level = tracker.degrade(format!("failure {i}"), None);
            assert_eq!(level.as_u8(), i.min(4));
        }
        let status = tracker.status();
        assert_eq!(status.level, 4);
        assert_eq!(status.level_name, "emergency_mode");
        assert_eq!(status.reasons.len(), 6);
        assert_eq!(status.reasons[0], "failure 1");
    }

    #[test]
    fn degrade_with_level_never_lowers() {
        let tracker = DegradationTracker::new();
        tracker.degrade("big outage", Some(ServiceLevel::MinimalService));
        assert_eq!(tracker.level(), ServiceLevel::MinimalService);
        tracker.degrade("minor blip", Some(ServiceLevel::ReducedFunctionality));
        assert_eq!(tracker.level(), ServiceLevel::MinimalService);
        assert_eq!(tracker.status().reasons.len(), 2);
    }

    #[test]
    fn recover_floors_at_zero_and_clears_reasons() {
        let tracker = DegradationTracker::new();
        tracker.degrade("a", None);
        tracker.degrade("b", None);
        assert_eq!(tracker.recover(1), ServiceLevel::ReducedFunctionality);
        assert_eq!(tracker.status().reasons.len(), 2);

        assert_eq!(tracker.recover(5), ServiceLevel::FullService);
        assert!(tracker.status().reasons.is_empty());
        assert_eq!(tracker.recover(1), ServiceLevel::FullService);
    }

    #[test]
    fn flapping_keeps_only_the_newest_reasons() {
        let tracker = DegradationTracker::with_max_reasons(3);
        for i in 0..1_000 {
            tracker.degrade(format!("failure {i}"), None);
            if i % 2 == 1 {
                tracker.recover(1);
            }
        }
        let status = tracker.status();
        assert_eq!(status.level, 3);
        assert_eq!(status.reasons, ["failure 997", "failure 998", "failure 999"]);
    }

    #[test]
    fn default_reason_cap() {
        let tracker = DegradationTracker::new();
        for i in 0..DEFAULT_MAX_REASONS + 10 {
            tracker.degrade(format!("failure {i}"), None);
        }
        let reasons = tracker.status().reasons;
        assert_eq!(reasons.len(), DEFAULT_MAX_REASONS);
        assert_eq!(reasons[0], "failure 10");
    }

    #[test]
    fn can_perform_operation_gates_by_required_level() {
        let tracker = DegradationTracker::new();
        assert!(tracker.can_perform_operation(ServiceLevel::FullService));

        tracker.degrade("slow provider", None);
        assert!(!tracker.can_perform_operation(ServiceLevel::FullService));
        assert!(tracker.can_perform_operation(ServiceLevel::ReducedFunctionality));
        assert!(tracker.can_perform_operation(ServiceLevel::EmergencyMode));

        tracker.degrade("outage", Some(ServiceLevel::EmergencyMode));
        assert!(!tracker.can_perform_operation(ServiceLevel::MinimalService));
        assert!(tracker.can_perform_operation(ServiceLevel::EmergencyMode));
    }

    #[test]
    fn reset_returns_to_full_service() {
        let tracker = DegradationTracker::new();
        tracker.degrade("x", Some(ServiceLevel::BasicService));
        tracker.reset();
        assert_eq!(tracker.level(), ServiceLevel::FullService);
        assert!(tracker.status().reasons.is_empty());
    }

    #[test]
    fn level_conversions() {
        assert_eq!(ServiceLevel::from_u8(2), ServiceLevel::BasicService);
        assert_eq!(ServiceLevel::from_u8(200), ServiceLevel::EmergencyMode);
        assert_eq!(ServiceLevel::MinimalService.as_u8(), 3);
        assert!(ServiceLevel::FullService < ServiceLevel::EmergencyMode);
        assert_eq!(ServiceLevel::ReducedFunctionality.to_string(), "reduced_functionality");
    }
}
