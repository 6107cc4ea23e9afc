//! # Postgres
//!
//! This crate provides the PostgreSQL backend of the availability watcher:
//! connection setup, schema bootstrap and a [`WatchStore`] implementation.
//!
//! [`WatchStore`]: availability_watch::WatchStore

/// Connection pool and schema management.
pub mod database;

/// PostgreSQL-backed watch store.
pub mod watch_store;
pub use watch_store::PgWatchStore;
