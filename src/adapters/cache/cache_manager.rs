//! Typed TTL cache shared by the catalog, tracker, and router.
//!
//! One moka cache per `CacheType`, each with its own TTL and LRU bound.
//! Values are stored as JSON so one manager serves heterogeneous types;
//! callers always know the concrete type for a given `(type, key)` pair.
//!
//! Consistency policy is write-through invalidation: repositories and
//! services invalidate the affected keys right after a successful commit,
//! and readers that miss repopulate from storage.

use moka::future::Cache;
use moka::notification::RemovalCause;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::domain::models::CacheConfig;

/// The cache families the engine maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    AchievementById,
    CategoryById,
    RootCategories,
    ChildrenByParent,
    UserPreference,
    GuildSettings,
}

impl CacheType {
    pub fn all() -> [Self; 6] {
        [
            Self::AchievementById,
            Self::CategoryById,
            Self::RootCategories,
            Self::ChildrenByParent,
            Self::UserPreference,
            Self::GuildSettings,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AchievementById => "achievement_by_id",
            Self::CategoryById => "category_by_id",
            Self::RootCategories => "root_categories",
            Self::ChildrenByParent => "children_by_parent",
            Self::UserPreference => "user_preference",
            Self::GuildSettings => "guild_settings",
        }
    }

    /// Per-type TTL override, as a fraction of the configured default.
    /// Preference data changes more often than the catalog shape.
    fn ttl(&self, default_ttl: Duration) -> Duration {
        match self {
            Self::UserPreference | Self::GuildSettings => default_ttl.min(Duration::from_secs(60)),
            _ => default_ttl,
        }
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one cache type. Evictions cover TTL expiry and LRU
/// pressure, not explicit invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct TypedCache {
    cache: Cache<String, Arc<serde_json::Value>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
}

/// Typed, TTL'd, pattern-invalidatable cache keyed by `(CacheType, key)`.
pub struct CacheManager {
    caches: HashMap<CacheType, TypedCache>,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        let default_ttl = Duration::from_secs(config.default_ttl_seconds);
        let caches = CacheType::all()
            .into_iter()
            .map(|ty| {
                let evictions = Arc::new(AtomicU64::new(0));
                let listener_evictions = Arc::clone(&evictions);
                let cache = Cache::builder()
                    .max_capacity(config.max_entries_per_type)
                    .time_to_live(ty.ttl(default_ttl))
                    .support_invalidation_closures()
                    .eviction_listener(move |_key, _value, cause| {
                        if matches!(cause, RemovalCause::Expired | RemovalCause::Size) {
                            listener_evictions.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                    .build();
                (
                    ty,
                    TypedCache {
                        cache,
                        hits: AtomicU64::new(0),
                        misses: AtomicU64::new(0),
                        evictions,
                    },
                )
            })
            .collect();

        Self { caches }
    }

    fn typed(&self, ty: CacheType) -> &TypedCache {
        // The map is total over CacheType::all().
        &self.caches[&ty]
    }

    /// Typed lookup. A present-but-undecodable entry counts as a miss and
    /// is dropped.
    pub async fn get<T: DeserializeOwned>(&self, ty: CacheType, key: &str) -> Option<T> {
        let typed = self.typed(ty);
        match typed.cache.get(key).await {
            Some(value) => match serde_json::from_value((*value).clone()) {
                Ok(decoded) => {
                    typed.hits.fetch_add(1, Ordering::Relaxed);
                    Some(decoded)
                }
                Err(e) => {
                    warn!(cache_type = %ty, key, error = %e, "dropping undecodable cache entry");
                    typed.cache.invalidate(key).await;
                    typed.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            None => {
                typed.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert<T: Serialize>(&self, ty: CacheType, key: impl Into<String>, value: &T) {
        match serde_json::to_value(value) {
            Ok(encoded) => {
                self.typed(ty)
                    .cache
                    .insert(key.into(), Arc::new(encoded))
                    .await;
            }
            Err(e) => warn!(cache_type = %ty, error = %e, "failed to encode cache value"),
        }
    }

    pub async fn invalidate(&self, ty: CacheType, key: &str) {
        self.typed(ty).cache.invalidate(key).await;
    }

    /// Drop every entry of `ty` whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, ty: CacheType, prefix: &str) {
        let prefix = prefix.to_string();
        if let Err(e) = self
            .typed(ty)
            .cache
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            warn!(cache_type = %ty, error = %e, "prefix invalidation failed");
        }
    }

    pub fn invalidate_type(&self, ty: CacheType) {
        self.typed(ty).cache.invalidate_all();
    }

    pub fn stats(&self, ty: CacheType) -> CacheStats {
        let typed = self.typed(ty);
        CacheStats {
            hits: typed.hits.load(Ordering::Relaxed),
            misses: typed.misses.load(Ordering::Relaxed),
            evictions: typed.evictions.load(Ordering::Relaxed),
            entry_count: typed.cache.entry_count(),
        }
    }

    pub fn all_stats(&self) -> Vec<(CacheType, CacheStats)> {
        CacheType::all()
            .into_iter()
            .map(|ty| (ty, self.stats(ty)))
            .collect()
    }
}
