//! Performance monitor: rolling operation timings, cache stats, and
//! baseline-based regression detection.
//!
//! Strictly observational. Nothing here sits on the correctness path and
//! no failure in this module ever fails a caller.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::cache::{CacheManager, CacheStats};
use crate::domain::errors::StorageError;
use crate::domain::models::{EventFilter, EventRecord, EventStats, IncomingEvent};
use crate::domain::ports::EventRepository;

/// Bounded sample ring per operation; enough for a stable p95 without
/// unbounded growth.
const MAX_SAMPLES: usize = 256;

#[derive(Debug, Default)]
struct OperationWindow {
    count: u64,
    total_micros: u128,
    max_micros: u64,
    samples: VecDeque<u64>,
}

impl OperationWindow {
    fn record(&mut self, micros: u64) {
        self.count += 1;
        self.total_micros += u128::from(micros);
        self.max_micros = self.max_micros.max(micros);
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(micros);
    }

    fn stats(&self) -> OperationStats {
        let avg_micros = if self.count == 0 {
            0
        } else {
            (self.total_micros / u128::from(self.count)) as u64
        };
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let p95_micros = if sorted.is_empty() {
            0
        } else {
            sorted[(sorted.len() * 95 / 100).min(sorted.len() - 1)]
        };
        OperationStats {
            count: self.count,
            avg_micros,
            max_micros: self.max_micros,
            p95_micros,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub avg_micros: u64,
    pub max_micros: u64,
    pub p95_micros: u64,
}

/// Point-in-time view of engine performance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfSnapshot {
    pub taken_at: DateTime<Utc>,
    pub operations: BTreeMap<String, OperationStats>,
    pub cache: BTreeMap<String, CacheStats>,
}

/// A metric that exceeded the baseline by more than the allowed factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub metric: String,
    pub baseline_micros: u64,
    pub current_micros: u64,
    pub factor: f64,
}

pub struct PerformanceMonitor {
    enabled: bool,
    windows: RwLock<HashMap<String, OperationWindow>>,
}

impl PerformanceMonitor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one operation duration under a stable metric name
    /// (e.g. `repo.events.insert`, `cache.achievement_by_id.get`).
    pub fn record(&self, operation: &str, duration: Duration) {
        if !self.enabled {
            return;
        }
        let micros = duration.as_micros().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut windows) = self.windows.write() {
            windows.entry(operation.to_string()).or_default().record(micros);
        }
    }

    /// Time a future and record it.
    pub async fn observe<T, F>(&self, operation: &str, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        if !self.enabled {
            return future.await;
        }
        let started = Instant::now();
        let output = future.await;
        self.record(operation, started.elapsed());
        output
    }

    pub fn snapshot(&self, cache: Option<&CacheManager>) -> PerfSnapshot {
        let operations = self
            .windows
            .read()
            .map(|windows| {
                windows
                    .iter()
                    .map(|(name, window)| (name.clone(), window.stats()))
                    .collect()
            })
            .unwrap_or_default();

        let cache_stats = cache
            .map(|manager| {
                manager
                    .all_stats()
                    .into_iter()
                    .map(|(ty, stats)| (ty.as_str().to_string(), stats))
                    .collect()
            })
            .unwrap_or_default();

        PerfSnapshot {
            taken_at: Utc::now(),
            operations,
            cache: cache_stats,
        }
    }

    /// Persist a snapshot as the new baseline. Failures are logged, never
    /// propagated.
    pub fn save_baseline(&self, snapshot: &PerfSnapshot, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string_pretty(snapshot)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, json)
        };
        if let Err(e) = write() {
            warn!(path = %path.display(), error = %e, "failed to save performance baseline");
        }
    }

    pub fn load_baseline(&self, path: impl AsRef<Path>) -> Option<PerfSnapshot> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable baseline");
                None
            }
        }
    }

    /// Compare a snapshot against a baseline; any operation whose average
    /// latency grew past `factor`× is reported. Low-volume metrics
    /// (count < 10) are skipped as noise.
    pub fn detect_regressions(
        current: &PerfSnapshot,
        baseline: &PerfSnapshot,
        factor: f64,
    ) -> Vec<Regression> {
        let mut regressions = Vec::new();
        for (metric, stats) in &current.operations {
            if stats.count < 10 {
                continue;
            }
            let Some(base) = baseline.operations.get(metric) else {
                continue;
            };
            if base.avg_micros == 0 {
                continue;
            }
            let ratio = stats.avg_micros as f64 / base.avg_micros as f64;
            if ratio > factor {
                debug!(metric, ratio, "regression candidate");
                regressions.push(Regression {
                    metric: metric.clone(),
                    baseline_micros: base.avg_micros,
                    current_micros: stats.avg_micros,
                    factor: ratio,
                });
            }
        }
        regressions
    }
}

/// Timing decorator over the event repository, the engine's hottest
/// storage surface. Wraps any `EventRepository` and records per-operation
/// latencies into the monitor.
pub struct MonitoredEventRepository<R> {
    inner: R,
    monitor: Arc<PerformanceMonitor>,
}

impl<R> MonitoredEventRepository<R> {
    pub fn new(inner: R, monitor: Arc<PerformanceMonitor>) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl<R: EventRepository> EventRepository for MonitoredEventRepository<R> {
    async fn insert(&self, event: &IncomingEvent) -> Result<i64, StorageError> {
        self.monitor
            .observe("repo.events.insert", self.inner.insert(event))
            .await
    }

    async fn insert_batch(&self, events: &[IncomingEvent]) -> Result<Vec<i64>, StorageError> {
        self.monitor
            .observe("repo.events.insert_batch", self.inner.insert_batch(events))
            .await
    }

    async fn get(&self, id: i64) -> Result<Option<EventRecord>, StorageError> {
        self.monitor.observe("repo.events.get", self.inner.get(id)).await
    }

    async fn list_unprocessed(
        &self,
        limit: u32,
        event_types: Option<&[String]>,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.monitor
            .observe(
                "repo.events.list_unprocessed",
                self.inner.list_unprocessed(limit, event_types),
            )
            .await
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, StorageError> {
        self.monitor
            .observe("repo.events.mark_processed", self.inner.mark_processed(ids))
            .await
    }

    async fn list_by_user(
        &self,
        user_id: u64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.monitor
            .observe(
                "repo.events.list_by_user",
                self.inner.list_by_user(user_id, filter),
            )
            .await
    }

    async fn list_by_guild(
        &self,
        guild_id: u64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.monitor
            .observe(
                "repo.events.list_by_guild",
                self.inner.list_by_guild(guild_id, filter),
            )
            .await
    }

    async fn cleanup_old(
        &self,
        older_than: DateTime<Utc>,
        batch_size: u32,
        keep_processed: bool,
    ) -> Result<u64, StorageError> {
        self.monitor
            .observe(
                "repo.events.cleanup_old",
                self.inner.cleanup_old(older_than, batch_size, keep_processed),
            )
            .await
    }

    async fn archive_old(
        &self,
        older_than: DateTime<Utc>,
        archive_table: &str,
    ) -> Result<u64, StorageError> {
        self.monitor
            .observe(
                "repo.events.archive_old",
                self.inner.archive_old(older_than, archive_table),
            )
            .await
    }

    async fn stats(&self) -> Result<EventStats, StorageError> {
        self.monitor.observe("repo.events.stats", self.inner.stats()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(metric: &str, count: u64, avg_micros: u64) -> PerfSnapshot {
        let mut operations = BTreeMap::new();
        operations.insert(
            metric.to_string(),
            OperationStats {
                count,
                avg_micros,
                max_micros: avg_micros * 2,
                p95_micros: avg_micros,
            },
        );
        PerfSnapshot {
            taken_at: Utc::now(),
            operations,
            cache: BTreeMap::new(),
        }
    }

    #[test]
    fn test_record_and_snapshot() {
        let monitor = PerformanceMonitor::new(true);
        monitor.record("repo.events.insert", Duration::from_micros(100));
        monitor.record("repo.events.insert", Duration::from_micros(300));

        let snapshot = monitor.snapshot(None);
        let stats = &snapshot.operations["repo.events.insert"];
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg_micros, 200);
        assert_eq!(stats.max_micros, 300);
    }

    #[test]
    fn test_disabled_monitor_records_nothing() {
        let monitor = PerformanceMonitor::new(false);
        monitor.record("anything", Duration::from_micros(100));
        assert!(monitor.snapshot(None).operations.is_empty());
    }

    #[test]
    fn test_regression_detection() {
        let baseline = snapshot_with("repo.progress.apply", 100, 100);
        let degraded = snapshot_with("repo.progress.apply", 100, 500);

        let regressions = PerformanceMonitor::detect_regressions(&degraded, &baseline, 2.0);
        assert_eq!(regressions.len(), 1);
        assert_eq!(regressions[0].metric, "repo.progress.apply");
        assert!((regressions[0].factor - 5.0).abs() < 1e-9);

        // Within the allowed factor: no signal.
        let fine = snapshot_with("repo.progress.apply", 100, 150);
        assert!(PerformanceMonitor::detect_regressions(&fine, &baseline, 2.0).is_empty());
    }

    #[test]
    fn test_low_volume_metrics_are_skipped() {
        let baseline = snapshot_with("rare.op", 5, 100);
        let degraded = snapshot_with("rare.op", 5, 10_000);
        assert!(PerformanceMonitor::detect_regressions(&degraded, &baseline, 2.0).is_empty());
    }

    #[test]
    fn test_baseline_round_trip() {
        let monitor = PerformanceMonitor::new(true);
        monitor.record("op", Duration::from_micros(250));
        let snapshot = monitor.snapshot(None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        monitor.save_baseline(&snapshot, &path);

        let loaded = monitor.load_baseline(&path).unwrap();
        assert_eq!(loaded.operations["op"].count, 1);
    }

    #[tokio::test]
    async fn test_observe_passes_output_through() {
        let monitor = PerformanceMonitor::new(true);
        let value = monitor.observe("compute", async { 41 + 1 }).await;
        assert_eq!(value, 42);
        assert_eq!(monitor.snapshot(None).operations["compute"].count, 1);
    }
}
