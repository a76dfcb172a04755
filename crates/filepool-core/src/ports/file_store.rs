//! File metadata store port definition.
//!
//! This port persists [`FileEntry`] rows and the component links pointing
//! at them. Implementations live in `filepool-db`.

use async_trait::async_trait;

use super::StoreError;
use crate::types::{FileEntry, FileId, LinkEntry, SiteId};

/// Port for persisting pooled file metadata and component links.
///
/// All operations are scoped to a site. Lookups return `None` for absent
/// rows; removals of absent rows succeed silently so callers can stay
/// idempotent.
#[async_trait]
pub trait FileStorePort: Send + Sync {
    /// Insert or replace a file entry.
    async fn upsert_file(&self, site_id: &SiteId, entry: &FileEntry) -> Result<(), StoreError>;

    /// Look up one file entry.
    async fn file(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<Option<FileEntry>, StoreError>;

    /// All file entries of a site.
    async fn all_files(&self, site_id: &SiteId) -> Result<Vec<FileEntry>, StoreError>;

    /// Remove one file entry.
    async fn remove_file(&self, site_id: &SiteId, file_id: &FileId) -> Result<(), StoreError>;

    /// Flag one file as stale so the next access re-checks freshness.
    async fn set_stale(&self, site_id: &SiteId, file_id: &FileId) -> Result<(), StoreError>;

    /// Flag every file of a site as stale.
    ///
    /// With `only_unknown`, only files whose updates cannot be detected
    /// are flagged: external files, and files with neither a revision nor
    /// a modification time. Returns the number of flagged rows.
    async fn set_all_stale(&self, site_id: &SiteId, only_unknown: bool) -> Result<u64, StoreError>;

    /// Flag the given files as stale, with the same `only_unknown` filter
    /// as [`FileStorePort::set_all_stale`]. Returns the number of flagged
    /// rows.
    async fn set_stale_many(
        &self,
        site_id: &SiteId,
        file_ids: &[FileId],
        only_unknown: bool,
    ) -> Result<u64, StoreError>;

    /// Backfill the modification time of a file entry.
    async fn set_timemodified(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        timemodified: i64,
    ) -> Result<(), StoreError>;

    /// Record a component link. Adding the same link twice is a no-op.
    async fn add_link(&self, site_id: &SiteId, entry: &LinkEntry) -> Result<(), StoreError>;

    /// All links pointing at one file.
    async fn links_for_file(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<Vec<LinkEntry>, StoreError>;

    /// All links owned by one component instance.
    ///
    /// The component id must already be normalized; absent ids are stored
    /// as `"-1"` and queried the same way.
    async fn links_for_component(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: &str,
    ) -> Result<Vec<LinkEntry>, StoreError>;

    /// All links of a site.
    async fn all_links(&self, site_id: &SiteId) -> Result<Vec<LinkEntry>, StoreError>;

    /// Whether a component instance has any links.
    async fn component_has_links(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: &str,
    ) -> Result<bool, StoreError>;

    /// Remove every link pointing at one file.
    async fn remove_links_for_file(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<(), StoreError>;

    /// Drop all file entries and links of a site.
    async fn clear(&self, site_id: &SiteId) -> Result<(), StoreError>;
}
