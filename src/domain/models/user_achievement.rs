//! Earned-achievement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An award: one user holding one achievement. Unique per
/// `(user_id, achievement_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAchievement {
    pub id: i64,
    pub user_id: u64,
    pub achievement_id: i64,
    pub earned_at: DateTime<Utc>,
    pub notified: bool,
}

/// Aggregate stats for one user's earned achievements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAchievementStats {
    pub earned_count: u64,
    pub total_points: i64,
}

/// Global popularity entry: how many users hold an achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementPopularity {
    pub achievement_id: i64,
    pub earned_count: u64,
}
