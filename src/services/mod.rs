//! Application services for the achievement engine.

pub mod award;
pub mod catalog;
pub mod evaluators;
pub mod event_maintenance;
pub mod lock_table;
pub mod notifications;
pub mod perf;
pub mod progress;
pub mod trigger_engine;

pub use award::{AwardEvent, AwardOutcome, AwardService};
pub use catalog::CatalogService;
pub use evaluators::{
    ConditionalEvaluator, CounterEvaluator, Evaluator, EvaluatorRegistry, MilestoneEvaluator,
    TimeBasedEvaluator,
};
pub use event_maintenance::{EventMaintenance, ARCHIVE_TABLE};
pub use lock_table::LockTable;
pub use notifications::NotificationRouter;
pub use perf::{
    MonitoredEventRepository, OperationStats, PerfSnapshot, PerformanceMonitor, Regression,
};
pub use progress::{EventOutcome, ProgressTracker};
pub use trigger_engine::TriggerEngine;
