//! Accolade is an achievement engine for community bots.
//!
//! Ingests user-activity events through a durable log, tracks per-user
//! progress against declarative criteria, awards achievements at most
//! once per user, and routes notifications through per-user preferences
//! with rate limiting and retries. Backed by SQLite (WAL) with a typed
//! TTL cache over the catalog.
//!
//! The host wires the engine up with [`infrastructure::AchievementEngine`],
//! providing a [`domain::ports::Notifier`] for the chat platform and
//! feeding events into [`services::TriggerEngine::dispatch`].

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use infrastructure::AchievementEngine;
