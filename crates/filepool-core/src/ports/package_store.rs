//! Package status store port definition.

use async_trait::async_trait;

use super::StoreError;
use crate::types::{PackageEntry, PackageId, SiteId};

/// Port for persisting package status rows.
#[async_trait]
pub trait PackageStorePort: Send + Sync {
    /// Insert or replace a package entry.
    async fn upsert(&self, site_id: &SiteId, entry: &PackageEntry) -> Result<(), StoreError>;

    /// Look up one package.
    async fn get(
        &self,
        site_id: &SiteId,
        package_id: &PackageId,
    ) -> Result<Option<PackageEntry>, StoreError>;

    /// All packages of a site.
    async fn all(&self, site_id: &SiteId) -> Result<Vec<PackageEntry>, StoreError>;

    /// Remove one package. Removing an absent package succeeds silently.
    async fn remove(&self, site_id: &SiteId, package_id: &PackageId) -> Result<(), StoreError>;

    /// Drop every package of a site. Callers wanting to notify per package
    /// read [`PackageStorePort::all`] first.
    async fn clear(&self, site_id: &SiteId) -> Result<(), StoreError>;
}
