//! Per-user progress state and the apply/transition types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's progress toward one achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub id: i64,
    pub user_id: u64,
    pub achievement_id: i64,
    pub current_value: f64,
    /// Mirror of the achievement's target at the time of the last apply.
    pub target_value: f64,
    /// Evaluator-owned state, stored verbatim.
    pub progress_data: Option<serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl AchievementProgress {
    pub fn fraction(&self) -> f64 {
        if self.target_value <= 0.0 {
            return 0.0;
        }
        (self.current_value / self.target_value).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.current_value >= self.target_value
    }
}

/// A change requested against a progress row.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressDelta {
    /// Replace `current_value`.
    Set(f64),
    /// Add to `current_value` (clamped at zero).
    Inc(f64),
    /// Replace `progress_data` without touching `current_value`.
    Merge(serde_json::Value),
    /// Replace both in one write.
    SetWithData(f64, serde_json::Value),
}

/// Result of applying a delta, computed inside the same transaction that
/// wrote the new value. `crossed_threshold` is the award edge:
/// `previous < target && current >= target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionReport {
    pub previous: f64,
    pub current: f64,
    pub target: f64,
    pub crossed_threshold: bool,
}

impl TransitionReport {
    pub fn new(previous: f64, current: f64, target: f64) -> Self {
        Self {
            previous,
            current,
            target,
            crossed_threshold: previous < target && current >= target,
        }
    }
}
