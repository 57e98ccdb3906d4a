//! Adapters: concrete implementations of the domain ports.

pub mod cache;
pub mod sqlite;
