//! `SQLite` implementation of the `FileStorePort` trait.

use async_trait::async_trait;
use sqlx::SqlitePool;

use filepool_core::{FileEntry, FileId, FileStorePort, LinkEntry, SiteId, StoreError};

/// Files whose updates cannot be detected and therefore must be treated
/// as possibly changed: external files, and files that recorded neither
/// a revision nor a modification time.
const UPDATE_UNKNOWN_CLAUSE: &str =
    "(is_external_file = 1 OR (revision = 0 AND timemodified = 0))";

/// `SQLite` implementation of the `FileStorePort` trait.
///
/// Persists pooled file metadata and the component links pointing at it.
pub struct SqliteFileStore {
    pool: SqlitePool,
}

impl SqliteFileStore {
    /// Create a new `SQLite` file store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileStorePort for SqliteFileStore {
    async fn upsert_file(&self, site_id: &SiteId, entry: &FileEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO files (
                site_id, file_id, url, path, extension, revision,
                timemodified, is_external_file, repository_type, stale,
                download_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site_id, file_id) DO UPDATE SET
                url = excluded.url,
                path = excluded.path,
                extension = excluded.extension,
                revision = excluded.revision,
                timemodified = excluded.timemodified,
                is_external_file = excluded.is_external_file,
                repository_type = excluded.repository_type,
                stale = excluded.stale,
                download_time = excluded.download_time
            "#,
        )
        .bind(site_id.as_str())
        .bind(entry.file_id.as_str())
        .bind(&entry.url)
        .bind(&entry.path)
        .bind(&entry.extension)
        .bind(entry.revision)
        .bind(entry.timemodified)
        .bind(i64::from(entry.is_external_file))
        .bind(&entry.repository_type)
        .bind(i64::from(entry.stale))
        .bind(entry.download_time)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn file(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<Option<FileEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT file_id, url, path, extension, revision, timemodified,
                   is_external_file, repository_type, stale, download_time
            FROM files
            WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_file_entry).transpose()
    }

    async fn all_files(&self, site_id: &SiteId) -> Result<Vec<FileEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, url, path, extension, revision, timemodified,
                   is_external_file, repository_type, stale, download_time
            FROM files
            WHERE site_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_file_entry).collect()
    }

    async fn remove_file(&self, site_id: &SiteId, file_id: &FileId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM files WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn set_stale(&self, site_id: &SiteId, file_id: &FileId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE files SET stale = 1 WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn set_all_stale(&self, site_id: &SiteId, only_unknown: bool) -> Result<u64, StoreError> {
        let sql = if only_unknown {
            format!("UPDATE files SET stale = 1 WHERE site_id = ? AND {UPDATE_UNKNOWN_CLAUSE}")
        } else {
            "UPDATE files SET stale = 1 WHERE site_id = ?".to_string()
        };

        let result = sqlx::query(&sql)
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn set_stale_many(
        &self,
        site_id: &SiteId,
        file_ids: &[FileId],
        only_unknown: bool,
    ) -> Result<u64, StoreError> {
        if file_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; file_ids.len()].join(", ");
        let mut sql =
            format!("UPDATE files SET stale = 1 WHERE site_id = ? AND file_id IN ({placeholders})");
        if only_unknown {
            sql.push_str(" AND ");
            sql.push_str(UPDATE_UNKNOWN_CLAUSE);
        }

        let mut query = sqlx::query(&sql).bind(site_id.as_str());
        for file_id in file_ids {
            query = query.bind(file_id.as_str());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn set_timemodified(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        timemodified: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE files SET timemodified = ? WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(timemodified)
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn add_link(&self, site_id: &SiteId, entry: &LinkEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO links (site_id, file_id, component, component_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(site_id.as_str())
        .bind(entry.file_id.as_str())
        .bind(&entry.component)
        .bind(&entry.component_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn links_for_file(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<Vec<LinkEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, component, component_id
            FROM links
            WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_link_entry).collect()
    }

    async fn links_for_component(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: &str,
    ) -> Result<Vec<LinkEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, component, component_id
            FROM links
            WHERE site_id = ? AND component = ? AND component_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(component)
        .bind(component_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_link_entry).collect()
    }

    async fn all_links(&self, site_id: &SiteId) -> Result<Vec<LinkEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, component, component_id
            FROM links
            WHERE site_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_link_entry).collect()
    }

    async fn component_has_links(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: &str,
    ) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM links
            WHERE site_id = ? AND component = ? AND component_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(component)
        .bind(component_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(count > 0)
    }

    async fn remove_links_for_file(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM links WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, site_id: &SiteId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM files WHERE site_id = ?")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM links WHERE site_id = ?")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

/// Convert a database row to a `FileEntry`.
fn row_to_file_entry(row: &sqlx::sqlite::SqliteRow) -> Result<FileEntry, StoreError> {
    use sqlx::Row;

    let file_id: String = row.try_get("file_id").map_err(map_column_error)?;
    let url: String = row.try_get("url").map_err(map_column_error)?;
    let path: String = row.try_get("path").map_err(map_column_error)?;
    let extension: Option<String> = row.try_get("extension").map_err(map_column_error)?;
    let revision: i64 = row.try_get("revision").map_err(map_column_error)?;
    let timemodified: i64 = row.try_get("timemodified").map_err(map_column_error)?;
    let is_external_file: i64 = row.try_get("is_external_file").map_err(map_column_error)?;
    let repository_type: Option<String> =
        row.try_get("repository_type").map_err(map_column_error)?;
    let stale: i64 = row.try_get("stale").map_err(map_column_error)?;
    let download_time: i64 = row.try_get("download_time").map_err(map_column_error)?;

    Ok(FileEntry {
        file_id: FileId::new(file_id),
        url,
        path,
        extension,
        revision,
        timemodified,
        is_external_file: is_external_file != 0,
        repository_type,
        stale: stale != 0,
        download_time,
    })
}

/// Convert a database row to a `LinkEntry`.
fn row_to_link_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LinkEntry, StoreError> {
    use sqlx::Row;

    let file_id: String = row.try_get("file_id").map_err(map_column_error)?;
    let component: String = row.try_get("component").map_err(map_column_error)?;
    let component_id: String = row.try_get("component_id").map_err(map_column_error)?;

    Ok(LinkEntry {
        file_id: FileId::new(file_id),
        component,
        component_id,
    })
}

fn map_column_error(e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("Column read error: {e}"))
}
