//! Download queue store port definition.
//!
//! The queue is persistent so pending downloads survive restarts. The
//! in-memory side of the queue (the runner, waiters and pause state) lives
//! in the engine; this port only covers durable rows.

use async_trait::async_trait;

use super::StoreError;
use crate::types::{FileId, QueueEntry, SiteId};

/// Port for the persistent download queue.
#[async_trait]
pub trait QueueStorePort: Send + Sync {
    /// Insert or replace an entry. Merging a re-added request into an
    /// existing row is the engine's job; this simply writes the row.
    async fn upsert(&self, entry: &QueueEntry) -> Result<(), StoreError>;

    /// Look up the entry for one file.
    async fn get(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// The most important entry: highest priority first, oldest first
    /// within a priority. `None` when the queue is empty.
    async fn next(&self) -> Result<Option<QueueEntry>, StoreError>;

    /// Remove an entry. Removing an absent entry succeeds silently.
    async fn remove(&self, site_id: &SiteId, file_id: &FileId) -> Result<(), StoreError>;
}
