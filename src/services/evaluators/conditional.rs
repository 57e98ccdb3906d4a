//! Conditional criteria: a structured predicate over event data.

use super::Evaluator;
use crate::domain::errors::EvaluatorError;
use crate::domain::models::{
    event_types, Achievement, AchievementProgress, AchievementType, Criteria, EventRecord,
    ProgressDelta,
};

pub struct ConditionalEvaluator;

impl Evaluator for ConditionalEvaluator {
    fn achievement_type(&self) -> AchievementType {
        AchievementType::Conditional
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
        progress: Option<&AchievementProgress>,
    ) -> Result<Option<ProgressDelta>, EvaluatorError> {
        let Criteria::Conditional { expr } = &achievement.criteria else {
            return Err(EvaluatorError {
                achievement_id: achievement.id,
                message: "criteria is not conditional".to_string(),
            });
        };

        // Once satisfied there is nothing left to do.
        if progress.is_some_and(AchievementProgress::is_complete) {
            return Ok(None);
        }
        if expr.matches(&event.event_data) {
            Ok(Some(ProgressDelta::Set(1.0)))
        } else {
            Ok(None)
        }
    }
}
