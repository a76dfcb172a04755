//! Composition utilities for wiring the engine to `SQLite` backends.
//!
//! This module provides factory functions for building the store
//! container out of `SQLite` implementations. It is focused purely on
//! construction and should not contain any domain logic.

use sqlx::SqlitePool;
use std::sync::Arc;

use filepool_core::Stores;

use crate::repositories::{SqliteFileStore, SqlitePackageStore, SqliteQueueStore};

/// Factory for creating store instances with `SQLite` backends.
pub struct StoreFactory;

impl StoreFactory {
    /// Build all `SQLite` stores from a pool.
    ///
    /// This is the recommended way for applications to obtain stores.
    /// Returns the `Stores` container from `filepool-core` holding
    /// trait-object-wrapped stores.
    pub fn build_stores(pool: &SqlitePool) -> Stores {
        Stores::new(
            Arc::new(SqliteFileStore::new(pool.clone())),
            Arc::new(SqliteQueueStore::new(pool.clone())),
            Arc::new(SqlitePackageStore::new(pool.clone())),
        )
    }

    /// Create a file store from a pool.
    pub fn file_store(pool: SqlitePool) -> Arc<SqliteFileStore> {
        Arc::new(SqliteFileStore::new(pool))
    }

    /// Create a queue store from a pool.
    pub fn queue_store(pool: SqlitePool) -> Arc<SqliteQueueStore> {
        Arc::new(SqliteQueueStore::new(pool))
    }

    /// Create a package store from a pool.
    pub fn package_store(pool: SqlitePool) -> Arc<SqlitePackageStore> {
        Arc::new(SqlitePackageStore::new(pool))
    }
}
