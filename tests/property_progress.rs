//! Property tests for progress semantics.

mod common;

use proptest::prelude::*;

use accolade::domain::models::ProgressDelta;
use common::{seed_counter_achievement, test_engine, RecordingNotifier};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With only non-negative increments, `current_value` never decreases
    /// and ends at the exact sum.
    #[test]
    fn counter_progress_is_monotone(increments in prop::collection::vec(0.0f64..50.0, 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let engine = test_engine(RecordingNotifier::new()).await;
            let achievement_id =
                seed_counter_achievement(&engine, "monotone", 1_000_000.0, 0).await;

            let mut last = 0.0f64;
            let mut sum = 0.0f64;
            for inc in &increments {
                let (report, progress) = engine
                    .tracker
                    .apply(42, achievement_id, ProgressDelta::Inc(*inc))
                    .await
                    .unwrap();
                sum += inc;
                prop_assert!(report.current >= last);
                prop_assert!(progress.current_value >= last);
                last = report.current;
            }
            prop_assert!((last - sum).abs() < 1e-6);
            Ok(())
        })?;
    }

    /// The threshold edge fires exactly once for any increment sequence
    /// that eventually reaches the target.
    #[test]
    fn threshold_edge_fires_once(increments in prop::collection::vec(0.1f64..2.0, 5..25)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let engine = test_engine(RecordingNotifier::new()).await;
            let achievement_id = seed_counter_achievement(&engine, "edges", 3.0, 0).await;

            let mut crossings = 0;
            for inc in &increments {
                let (report, _) = engine
                    .tracker
                    .apply(42, achievement_id, ProgressDelta::Inc(*inc))
                    .await
                    .unwrap();
                if report.crossed_threshold {
                    crossings += 1;
                }
            }
            let total: f64 = increments.iter().sum();
            let expected = i32::from(total >= 3.0);
            prop_assert_eq!(crossings, expected);
            Ok(())
        })?;
    }
}
