//! `SQLite` implementation of the `PackageStorePort` trait.

use async_trait::async_trait;
use sqlx::SqlitePool;

use filepool_core::{
    DownloadStatus, PackageEntry, PackageId, PackageStorePort, SiteId, StoreError,
};

/// `SQLite` implementation of the `PackageStorePort` trait.
pub struct SqlitePackageStore {
    pool: SqlitePool,
}

impl SqlitePackageStore {
    /// Create a new `SQLite` package store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageStorePort for SqlitePackageStore {
    async fn upsert(&self, site_id: &SiteId, entry: &PackageEntry) -> Result<(), StoreError> {
        let status = entry.status.as_str();
        let previous = entry.previous.map(|s| s.as_str());

        sqlx::query(
            r#"
            INSERT INTO packages (
                site_id, package_id, component, component_id, status,
                previous, updated, download_time, previous_download_time,
                extra
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site_id, package_id) DO UPDATE SET
                component = excluded.component,
                component_id = excluded.component_id,
                status = excluded.status,
                previous = excluded.previous,
                updated = excluded.updated,
                download_time = excluded.download_time,
                previous_download_time = excluded.previous_download_time,
                extra = excluded.extra
            "#,
        )
        .bind(site_id.as_str())
        .bind(entry.id.as_str())
        .bind(&entry.component)
        .bind(&entry.component_id)
        .bind(status)
        .bind(previous)
        .bind(entry.updated)
        .bind(entry.download_time)
        .bind(entry.previous_download_time)
        .bind(&entry.extra)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get(
        &self,
        site_id: &SiteId,
        package_id: &PackageId,
    ) -> Result<Option<PackageEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT component, component_id, status, previous, updated,
                   download_time, previous_download_time, extra
            FROM packages
            WHERE site_id = ? AND package_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(package_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_package_entry).transpose()
    }

    async fn all(&self, site_id: &SiteId) -> Result<Vec<PackageEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT component, component_id, status, previous, updated,
                   download_time, previous_download_time, extra
            FROM packages
            WHERE site_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_package_entry).collect()
    }

    async fn remove(&self, site_id: &SiteId, package_id: &PackageId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM packages WHERE site_id = ? AND package_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(package_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, site_id: &SiteId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM packages WHERE site_id = ?")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

/// Convert a database row to a `PackageEntry`.
///
/// The id is re-derived from the component fields rather than read back;
/// the row key and the derivation always agree because the id is computed
/// the same way on write.
fn row_to_package_entry(row: &sqlx::sqlite::SqliteRow) -> Result<PackageEntry, StoreError> {
    use sqlx::Row;

    let component: String = row.try_get("component").map_err(map_column_error)?;
    let component_id: String = row.try_get("component_id").map_err(map_column_error)?;
    let status: String = row.try_get("status").map_err(map_column_error)?;
    let previous: Option<String> = row.try_get("previous").map_err(map_column_error)?;
    let updated: i64 = row.try_get("updated").map_err(map_column_error)?;
    let download_time: i64 = row.try_get("download_time").map_err(map_column_error)?;
    let previous_download_time: i64 = row
        .try_get("previous_download_time")
        .map_err(map_column_error)?;
    let extra: Option<String> = row.try_get("extra").map_err(map_column_error)?;

    Ok(PackageEntry {
        id: PackageId::for_component(&component, Some(&component_id)),
        component,
        component_id,
        status: DownloadStatus::parse(&status),
        previous: previous.map(|s| DownloadStatus::parse(&s)),
        updated,
        download_time,
        previous_download_time,
        extra,
    })
}

fn map_column_error(e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("Column read error: {e}"))
}
