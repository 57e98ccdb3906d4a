//! Achievement definitions and their typed criteria.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four achievement families. Each has a registered evaluator that
/// interprets its criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementType {
    /// Monotonically increasing count toward a target.
    Counter,
    /// Single numeric threshold on a named measure.
    Milestone,
    /// Repetition within a rolling time window.
    TimeBased,
    /// Structured predicate over event data.
    Conditional,
}

impl AchievementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Milestone => "milestone",
            Self::TimeBased => "time_based",
            Self::Conditional => "conditional",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(Self::Counter),
            "milestone" => Some(Self::Milestone),
            "time_based" => Some(Self::TimeBased),
            "conditional" => Some(Self::Conditional),
            _ => None,
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::Counter,
            Self::Milestone,
            Self::TimeBased,
            Self::Conditional,
        ]
    }
}

impl std::fmt::Display for AchievementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator inside a conditional criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

/// Structured predicate evaluated against `event_data` by the conditional
/// evaluator. Kept deliberately small; anything fancier belongs in a new
/// achievement type with its own evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Field {
        field: String,
        op: CompareOp,
        value: serde_json::Value,
    },
}

impl Condition {
    /// Evaluate against an event payload.
    pub fn matches(&self, data: &serde_json::Value) -> bool {
        match self {
            Self::All { conditions } => conditions.iter().all(|c| c.matches(data)),
            Self::Any { conditions } => conditions.iter().any(|c| c.matches(data)),
            Self::Not { condition } => !condition.matches(data),
            Self::Field { field, op, value } => {
                let Some(actual) = data.get(field) else {
                    return false;
                };
                compare(actual, *op, value)
            }
        }
    }
}

fn compare(actual: &serde_json::Value, op: CompareOp, expected: &serde_json::Value) -> bool {
    use CompareOp::{Contains, Eq, Ge, Gt, Le, Lt, Ne};
    match op {
        Eq => actual == expected,
        Ne => actual != expected,
        Gt | Ge | Lt | Le => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(e)) => match op {
                Gt => a > e,
                Ge => a >= e,
                Lt => a < e,
                Le => a <= e,
                _ => unreachable!(),
            },
            _ => false,
        },
        Contains => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.contains(e),
            _ => match actual.as_array() {
                Some(items) => items.contains(expected),
                None => false,
            },
        },
    }
}

/// Typed completion criteria. Serialized as the `criteria` JSON column;
/// the variant always agrees with the achievement's `type` column
/// (the catalog normalizes them together).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Criteria {
    Counter {
        target_value: f64,
        counter_field: String,
    },
    Milestone {
        target_value: f64,
        milestone_type: String,
    },
    TimeBased {
        target_value: f64,
        time_unit: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_secs: Option<u64>,
    },
    Conditional {
        expr: Condition,
    },
}

impl Criteria {
    /// The achievement type this criteria shape belongs to.
    pub fn achievement_type(&self) -> AchievementType {
        match self {
            Self::Counter { .. } => AchievementType::Counter,
            Self::Milestone { .. } => AchievementType::Milestone,
            Self::TimeBased { .. } => AchievementType::TimeBased,
            Self::Conditional { .. } => AchievementType::Conditional,
        }
    }

    /// Numeric completion target. Conditional criteria complete in a single
    /// satisfying evaluation, so their target is 1.
    pub fn target_value(&self) -> f64 {
        match self {
            Self::Counter { target_value, .. }
            | Self::Milestone { target_value, .. }
            | Self::TimeBased { target_value, .. } => *target_value,
            Self::Conditional { .. } => 1.0,
        }
    }

    /// Criteria must parse against the declared type and carry a positive
    /// target for progress-bearing types.
    pub fn validate(&self, declared: AchievementType) -> Result<(), String> {
        if self.achievement_type() != declared {
            return Err(format!(
                "criteria shape is {} but achievement type is {}",
                self.achievement_type(),
                declared
            ));
        }
        if self.achievement_type() != AchievementType::Conditional && self.target_value() <= 0.0 {
            return Err(format!(
                "target_value must be positive, got {}",
                self.target_value()
            ));
        }
        Ok(())
    }

    /// Decode from the stored JSON and check it agrees with the `type`
    /// column. The variants carry disjoint field names, so untagged
    /// decoding is unambiguous.
    pub fn from_json(ty: AchievementType, raw: &str) -> Result<Self, serde_json::Error> {
        let criteria: Self = serde_json::from_str(raw)?;
        if criteria.achievement_type() != ty {
            return Err(serde::de::Error::custom(format!(
                "criteria shape {} does not match stored type {ty}",
                criteria.achievement_type()
            )));
        }
        Ok(criteria)
    }
}

/// An achievement definition from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category_id: i64,
    pub achievement_type: AchievementType,
    pub criteria: Criteria,
    pub points: i64,
    pub badge_url: Option<String>,
    /// External role id granted on award; opaque to the engine.
    pub role_reward: Option<String>,
    pub is_hidden: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Achievement {
    /// Whether this achievement qualifies for `important_only` guild
    /// announcements.
    pub fn is_important(&self) -> bool {
        self.points >= 100
    }
}

/// Fields accepted when creating an achievement.
#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub name: String,
    pub description: String,
    pub category_id: i64,
    pub criteria: Criteria,
    pub points: i64,
    pub badge_url: Option<String>,
    pub role_reward: Option<String>,
    pub is_hidden: bool,
}

/// Partial update for an achievement.
#[derive(Debug, Clone, Default)]
pub struct AchievementPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    /// Replacing criteria also re-derives the stored type.
    pub criteria: Option<Criteria>,
    pub points: Option<i64>,
    pub badge_url: Option<Option<String>>,
    pub role_reward: Option<Option<String>>,
    pub is_hidden: Option<bool>,
    pub is_active: Option<bool>,
}
