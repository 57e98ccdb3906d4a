//! Counter criteria: monotonically increasing counts.

use super::Evaluator;
use crate::domain::errors::EvaluatorError;
use crate::domain::models::{
    event_types, Achievement, AchievementProgress, AchievementType, Criteria, EventRecord,
    ProgressDelta,
};

pub struct CounterEvaluator;

impl Evaluator for CounterEvaluator {
    fn achievement_type(&self) -> AchievementType {
        AchievementType::Counter
    }

    fn candidate_event_types(&self) -> &'static [&'static str] {
        &[
            event_types::MESSAGE_SENT,
            event_types::REACTION_ADDED,
            event_types::VOICE_JOINED,
            event_types::COMMAND_USED,
        ]
    }

    fn apply_event(
        &self,
        achievement: &Achievement,
        event: &EventRecord,
        _progress: Option<&AchievementProgress>,
    ) -> Result<Option<ProgressDelta>, EvaluatorError> {
        let Criteria::Counter { counter_field, .. } = &achievement.criteria else {
            return Err(EvaluatorError {
                achievement_id: achievement.id,
                message: "criteria is not a counter".to_string(),
            });
        };

        // The event contributes only if it carries the counted field.
        let Some(value) = event.event_data.get(counter_field) else {
            return Ok(None);
        };
        let amount = value.as_f64().unwrap_or(1.0);
        if amount < 0.0 {
            return Err(EvaluatorError {
                achievement_id: achievement.id,
                message: format!("negative counter increment {amount} for '{counter_field}'"),
            });
        }
        Ok(Some(ProgressDelta::Inc(amount)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::evaluators::test_support::{achievement, event};
    use serde_json::json;

    fn counter(target: f64) -> Achievement {
        achievement(
            1,
            Criteria::Counter {
                target_value: target,
                counter_field: "messages".to_string(),
            },
        )
    }

    #[test]
    fn test_increments_by_field_value() {
        let delta = CounterEvaluator
            .apply_event(
                &counter(3.0),
                &event(event_types::MESSAGE_SENT, json!({"messages": 2})),
                None,
            )
            .unwrap();
        assert_eq!(delta, Some(ProgressDelta::Inc(2.0)));
    }

    #[test]
    fn test_non_numeric_field_counts_one() {
        let delta = CounterEvaluator
            .apply_event(
                &counter(3.0),
                &event(event_types::MESSAGE_SENT, json!({"messages": "hello"})),
                None,
            )
            .unwrap();
        assert_eq!(delta, Some(ProgressDelta::Inc(1.0)));
    }

    #[test]
    fn test_missing_field_is_not_a_candidate() {
        let delta = CounterEvaluator
            .apply_event(
                &counter(3.0),
                &event(event_types::REACTION_ADDED, json!({"reactions": 1})),
                None,
            )
            .unwrap();
        assert_eq!(delta, None);
    }

    #[test]
    fn test_negative_increment_is_an_error() {
        let err = CounterEvaluator
            .apply_event(
                &counter(3.0),
                &event(event_types::MESSAGE_SENT, json!({"messages": -4})),
                None,
            )
            .unwrap_err();
        assert!(err.message.contains("negative"));
    }
}
