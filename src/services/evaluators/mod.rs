//! Criterion evaluators.
//!
//! Each achievement type registers an `Evaluator` that maps raw activity
//! events onto progress deltas. The registry replaces inheritance: new
//! types plug in at startup without touching the engine.

mod conditional;
mod counter;
mod milestone;
mod time_based;

pub use conditional::ConditionalEvaluator;
pub use counter::CounterEvaluator;
pub use milestone::MilestoneEvaluator;
pub use time_based::TimeBasedEvaluator;

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::EvaluatorError;
use crate::domain::models::{
    Achievement, AchievementProgress, AchievementType, EventRecord, ProgressDelta,
};

/// Per-type criterion evaluation capability.
pub trait Evaluator: Send + Sync {
    fn achievement_type(&self) -> AchievementType;

    /// Event types this evaluator wants to see. Registered once at
    /// startup; events outside the union of all evaluators resolve to
    /// zero candidates.
    fn candidate_event_types(&self) -> &'static [&'static str];

    /// Turn one event into a progress delta for one achievement, given
    /// the progress state as it stood before this event. `None` means the
    /// event does not affect this achievement.
    fn apply_event(
        &self,
        achievement: &Achievement,
        event: &EventRecord,
        progress: Option<&AchievementProgress>,
    ) -> Result<Option<ProgressDelta>, EvaluatorError>;

    /// Whether the stored progress satisfies the criteria.
    fn is_satisfied(&self, progress: &AchievementProgress) -> bool {
        progress.is_complete()
    }
}

/// Maps achievement types to evaluators and event types to the
/// achievement types that may react to them.
pub struct EvaluatorRegistry {
    by_type: HashMap<AchievementType, Arc<dyn Evaluator>>,
    by_event: HashMap<&'static str, Vec<AchievementType>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            by_event: HashMap::new(),
        }
    }

    /// Registry with the four built-in evaluators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CounterEvaluator));
        registry.register(Arc::new(MilestoneEvaluator));
        registry.register(Arc::new(TimeBasedEvaluator));
        registry.register(Arc::new(ConditionalEvaluator));
        registry
    }

    /// Register an evaluator; replaces any previous one for the type.
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        let ty = evaluator.achievement_type();
        for event_type in evaluator.candidate_event_types() {
            let types = self.by_event.entry(event_type).or_default();
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
        self.by_type.insert(ty, evaluator);
    }

    pub fn get(&self, ty: AchievementType) -> Option<&Arc<dyn Evaluator>> {
        self.by_type.get(&ty)
    }

    /// Achievement types that may react to an event type. Unknown event
    /// types yield an empty slice.
    pub fn candidate_types_for(&self, event_type: &str) -> &[AchievementType] {
        self.by_event
            .get(event_type)
            .map_or(&[], Vec::as_slice)
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::models::{Criteria, EventRecord};
    use chrono::Utc;

    pub fn achievement(id: i64, criteria: Criteria) -> Achievement {
        Achievement {
            id,
            name: format!("achievement-{id}"),
            description: String::new(),
            category_id: 1,
            achievement_type: criteria.achievement_type(),
            criteria,
            points: 10,
            badge_url: None,
            role_reward: None,
            is_hidden: false,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn event(event_type: &str, data: serde_json::Value) -> EventRecord {
        EventRecord {
            id: 1,
            user_id: 42,
            guild_id: 500,
            event_type: event_type.to_string(),
            event_data: data,
            timestamp: Utc::now(),
            channel_id: None,
            processed: false,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn progress(current: f64, target: f64, data: Option<serde_json::Value>) -> AchievementProgress {
        AchievementProgress {
            id: 1,
            user_id: 42,
            achievement_id: 1,
            current_value: current,
            target_value: target,
            progress_data: data,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event_types;

    #[test]
    fn test_default_registry_covers_all_types() {
        let registry = EvaluatorRegistry::with_defaults();
        for ty in AchievementType::all() {
            assert!(registry.get(ty).is_some(), "missing evaluator for {ty}");
        }
    }

    #[test]
    fn test_candidate_resolution() {
        let registry = EvaluatorRegistry::with_defaults();
        let candidates = registry.candidate_types_for(event_types::MESSAGE_SENT);
        assert!(candidates.contains(&AchievementType::Counter));
        assert!(registry.candidate_types_for("unknown.event").is_empty());
    }

    #[test]
    fn test_register_replaces_and_dedupes() {
        let mut registry = EvaluatorRegistry::with_defaults();
        registry.register(Arc::new(CounterEvaluator));
        let candidates = registry.candidate_types_for(event_types::MESSAGE_SENT);
        let counter_entries = candidates
            .iter()
            .filter(|ty| **ty == AchievementType::Counter)
            .count();
        assert_eq!(counter_entries, 1);
    }
}
