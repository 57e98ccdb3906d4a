//! Engine wiring: pool, migrations, services, background loops.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::adapters::cache::CacheManager;
use crate::adapters::sqlite::{
    all_embedded_migrations, create_pool, verify_connection, Migrator, PoolConfig,
    SqliteAchievementRepository, SqliteCategoryRepository, SqliteEventRepository,
    SqliteNotificationRepository, SqliteProgressRepository, SqliteUserAchievementRepository,
};
use crate::domain::models::EngineConfig;
use crate::domain::ports::{EventRepository, Notifier};
use crate::services::{
    AwardService, CatalogService, EvaluatorRegistry, EventMaintenance, MonitoredEventRepository,
    NotificationRouter, PerformanceMonitor, ProgressTracker, TriggerEngine,
};

/// The assembled achievement engine. Construction wires every component;
/// `start` brings up the background loops and `shutdown` drains them.
pub struct AchievementEngine {
    pool: SqlitePool,
    pub catalog: Arc<CatalogService>,
    pub tracker: Arc<ProgressTracker>,
    pub awards: Arc<AwardService>,
    pub trigger: Arc<TriggerEngine>,
    pub router: Arc<NotificationRouter>,
    pub maintenance: Arc<EventMaintenance>,
    pub monitor: Arc<PerformanceMonitor>,
    pub cache: Arc<CacheManager>,
    events: Arc<dyn EventRepository>,
    config: EngineConfig,
}

impl AchievementEngine {
    /// Open the database (running migrations) and wire the engine with
    /// the default evaluator registry.
    pub async fn build(config: EngineConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let pool = create_pool(
            &config.database.url,
            Some(PoolConfig {
                max_connections: config.database.pool_size,
                min_connections: 1,
                acquire_timeout: config.database.pool_timeout(),
            }),
        )
        .await
        .context("Failed to open database")?;
        verify_connection(&pool).await.context("Database health check failed")?;

        Self::build_with_pool(pool, config, notifier).await
    }

    /// Wire against an existing pool (tests use an in-memory one).
    pub async fn build_with_pool(
        pool: SqlitePool,
        config: EngineConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let applied = Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .context("Migrations failed")?;
        if applied > 0 {
            info!(applied, "applied schema migrations");
        }

        let cache = Arc::new(CacheManager::new(&config.cache));
        let monitor = Arc::new(PerformanceMonitor::new(config.observability.enabled));

        let categories = Arc::new(SqliteCategoryRepository::new(pool.clone()));
        let achievements = Arc::new(SqliteAchievementRepository::new(pool.clone()));
        let progress = Arc::new(SqliteProgressRepository::new(pool.clone()));
        let user_achievements = Arc::new(SqliteUserAchievementRepository::new(pool.clone()));
        // The event log is the hottest storage surface; time it when
        // observability is on.
        let events: Arc<dyn EventRepository> = if config.observability.enabled {
            Arc::new(MonitoredEventRepository::new(
                SqliteEventRepository::new(pool.clone()),
                Arc::clone(&monitor),
            ))
        } else {
            Arc::new(SqliteEventRepository::new(pool.clone()))
        };
        let notifications = Arc::new(SqliteNotificationRepository::new(pool.clone()));

        let registry = Arc::new(EvaluatorRegistry::with_defaults());

        let catalog = Arc::new(CatalogService::new(
            categories,
            achievements.clone(),
            Arc::clone(&cache),
        ));
        let tracker = Arc::new(ProgressTracker::new(progress.clone(), Arc::clone(&registry)));
        let awards = Arc::new(AwardService::new(
            user_achievements,
            achievements.clone(),
            progress,
            config.engine.queue_capacity,
        ));
        let trigger = Arc::new(TriggerEngine::new(
            Arc::clone(&events),
            achievements,
            Arc::clone(&tracker),
            Arc::clone(&awards),
            registry,
            config.engine.clone(),
        ));
        let router = Arc::new(NotificationRouter::new(
            notifications,
            notifier,
            Arc::clone(&awards),
            Arc::clone(&cache),
            config.notifications.clone(),
        ));
        let maintenance = Arc::new(EventMaintenance::new(
            Arc::clone(&events),
            config.events.clone(),
        ));

        Ok(Self {
            pool,
            catalog,
            tracker,
            awards,
            trigger,
            router,
            maintenance,
            monitor,
            cache,
            events,
            config,
        })
    }

    /// Bring up the background loops. The router subscribes before the
    /// engine starts accepting events so no award signal is missed.
    pub async fn start(&self) {
        self.router.start().await;
        self.trigger.start().await;
        self.maintenance.start().await;
    }

    /// Graceful stop: drain the trigger engine, stop the router and
    /// maintenance, close the pool.
    pub async fn shutdown(&self) {
        self.trigger.shutdown().await;
        self.router.shutdown().await;
        self.maintenance.shutdown().await;
        self.pool.close().await;
    }

    pub fn events(&self) -> &Arc<dyn EventRepository> {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Snapshot current performance and compare against the stored
    /// baseline, if any. Purely informational.
    pub fn check_regressions(&self) -> Vec<crate::services::Regression> {
        let snapshot = self.monitor.snapshot(Some(&self.cache));
        let Some(baseline) = self
            .monitor
            .load_baseline(&self.config.observability.baseline_path)
        else {
            return Vec::new();
        };
        PerformanceMonitor::detect_regressions(
            &snapshot,
            &baseline,
            self.config.observability.regression_factor,
        )
    }

    /// Persist the current performance snapshot as the new baseline.
    pub fn save_baseline(&self) {
        let snapshot = self.monitor.snapshot(Some(&self.cache));
        self.monitor
            .save_baseline(&snapshot, &self.config.observability.baseline_path);
    }
}
