//! Time-based criteria: repetition within a rolling window.
//!
//! Progress state is a bounded ring of event timestamps kept inside
//! `progress_data`; `current_value` is the number of qualifying events
//! still inside the window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Evaluator;
use crate::domain::errors::EvaluatorError;
use crate::domain::models::{
    event_types, Achievement, AchievementProgress, AchievementType, Criteria, EventRecord,
    ProgressDelta,
};

/// Hard cap on retained timestamps regardless of target.
const MAX_RING_LEN: usize = 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct WindowState {
    timestamps: Vec<DateTime<Utc>>,
}

fn unit_seconds(time_unit: &str) -> Option<u64> {
    match time_unit {
        "seconds" => Some(1),
        "minutes" => Some(60),
        "hours" => Some(3_600),
        "days" => Some(86_400),
        "weeks" => Some(7 * 86_400),
        _ => None,
    }
}

pub struct TimeBasedEvaluator;

impl TimeBasedEvaluator {
    fn window_seconds(
        achievement: &Achievement,
        target: f64,
        time_unit: &str,
        window_secs: Option<u64>,
    ) -> Result<u64, EvaluatorError> {
        if let Some(explicit) = window_secs {
            return Ok(explicit);
        }
        let unit = unit_seconds(time_unit).ok_or_else(|| EvaluatorError {
            achievement_id: achievement.id,
            message: format!("unknown time unit '{time_unit}'"),
        })?;
        // Default window: one unit per required repetition.
        Ok(unit.saturating_mul(target.ceil() as u64))
    }
}

impl Evaluator for TimeBasedEvaluator {
    fn achievement_type(&self) -> AchievementType {
        AchievementType::TimeBased
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
        let Criteria::TimeBased {
            target_value,
            time_unit,
            window_secs,
        } = &achievement.criteria
        else {
            return Err(EvaluatorError {
                achievement_id: achievement.id,
                message: "criteria is not time based".to_string(),
            });
        };

        let window =
            Self::window_seconds(achievement, *target_value, time_unit, *window_secs)?;
        let cutoff = event.timestamp - chrono::Duration::seconds(window as i64);

        let mut state: WindowState = progress
            .and_then(|p| p.progress_data.clone())
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| EvaluatorError {
                achievement_id: achievement.id,
                message: format!("corrupt window state: {e}"),
            })?
            .unwrap_or_default();

        state.timestamps.push(event.timestamp);
        state.timestamps.retain(|ts| *ts > cutoff);
        state.timestamps.sort_unstable();
        if state.timestamps.len() > MAX_RING_LEN {
            let excess = state.timestamps.len() - MAX_RING_LEN;
            state.timestamps.drain(..excess);
        }

        let count = state.timestamps.len() as f64;
        let data = serde_json::to_value(&state).map_err(|e| EvaluatorError {
            achievement_id: achievement.id,
            message: format!("window state serialization: {e}"),
        })?;
        Ok(Some(ProgressDelta::SetWithData(count, data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::evaluators::test_support::{achievement, event, progress};
    use serde_json::json;

    fn time_based(target: f64, window_secs: Option<u64>) -> Achievement {
        achievement(
            3,
            Criteria::TimeBased {
                target_value: target,
                time_unit: "hours".to_string(),
                window_secs,
            },
        )
    }

    #[test]
    fn test_first_event_counts_one() {
        let delta = TimeBasedEvaluator
            .apply_event(
                &time_based(3.0, Some(3_600)),
                &event(event_types::MESSAGE_SENT, json!({})),
                None,
            )
            .unwrap()
            .unwrap();
        let ProgressDelta::SetWithData(count, _) = delta else {
            panic!("expected SetWithData");
        };
        assert_eq!(count, 1.0);
    }

    #[test]
    fn test_window_drops_stale_entries() {
        let now = Utc::now();
        let stale = now - chrono::Duration::hours(2);
        let recent = now - chrono::Duration::minutes(10);
        let state = json!({"timestamps": [stale.to_rfc3339(), recent.to_rfc3339()]});

        let delta = TimeBasedEvaluator
            .apply_event(
                &time_based(3.0, Some(3_600)),
                &event(event_types::MESSAGE_SENT, json!({})),
                Some(&progress(2.0, 3.0, Some(state))),
            )
            .unwrap()
            .unwrap();

        let ProgressDelta::SetWithData(count, data) = delta else {
            panic!("expected SetWithData");
        };
        // Stale entry dropped; recent + new remain.
        assert_eq!(count, 2.0);
        let parsed: WindowState = serde_json::from_value(data).unwrap();
        assert_eq!(parsed.timestamps.len(), 2);
    }

    #[test]
    fn test_default_window_from_unit() {
        let window =
            TimeBasedEvaluator::window_seconds(&time_based(7.0, None), 7.0, "days", None)
                .unwrap();
        assert_eq!(window, 7 * 86_400);
    }

    #[test]
    fn test_unknown_unit_is_an_error() {
        let err =
            TimeBasedEvaluator::window_seconds(&time_based(1.0, None), 1.0, "fortnights", None)
                .unwrap_err();
        assert!(err.message.contains("fortnights"));
    }
}
