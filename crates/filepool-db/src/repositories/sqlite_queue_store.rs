//! `SQLite` implementation of the `QueueStorePort` trait.

use async_trait::async_trait;
use sqlx::SqlitePool;

use filepool_core::{ComponentLink, FileId, QueueEntry, QueueStorePort, SiteId, StoreError};

/// `SQLite` implementation of the `QueueStorePort` trait.
///
/// Persists the download queue so pending downloads survive restarts.
/// Component links travel with each entry as a JSON column.
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Create a new `SQLite` queue store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStorePort for SqliteQueueStore {
    async fn upsert(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        let links_json = serde_json::to_string(&entry.links)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO queue (
                site_id, file_id, url, added, priority, revision,
                timemodified, path, is_external_file, repository_type, links
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site_id, file_id) DO UPDATE SET
                url = excluded.url,
                added = excluded.added,
                priority = excluded.priority,
                revision = excluded.revision,
                timemodified = excluded.timemodified,
                path = excluded.path,
                is_external_file = excluded.is_external_file,
                repository_type = excluded.repository_type,
                links = excluded.links
            "#,
        )
        .bind(entry.site_id.as_str())
        .bind(entry.file_id.as_str())
        .bind(&entry.url)
        .bind(entry.added)
        .bind(entry.priority)
        .bind(entry.revision)
        .bind(entry.timemodified)
        .bind(&entry.path)
        .bind(i64::from(entry.is_external_file))
        .bind(&entry.repository_type)
        .bind(&links_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT site_id, file_id, url, added, priority, revision,
                   timemodified, path, is_external_file, repository_type, links
            FROM queue
            WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_queue_entry).transpose()
    }

    async fn next(&self) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT site_id, file_id, url, added, priority, revision,
                   timemodified, path, is_external_file, repository_type, links
            FROM queue
            ORDER BY priority DESC, added ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_queue_entry).transpose()
    }

    async fn remove(&self, site_id: &SiteId, file_id: &FileId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM queue WHERE site_id = ? AND file_id = ?
            "#,
        )
        .bind(site_id.as_str())
        .bind(file_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

/// Convert a database row to a `QueueEntry`.
fn row_to_queue_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QueueEntry, StoreError> {
    use sqlx::Row;

    let site_id: String = row.try_get("site_id").map_err(map_column_error)?;
    let file_id: String = row.try_get("file_id").map_err(map_column_error)?;
    let url: String = row.try_get("url").map_err(map_column_error)?;
    let added: i64 = row.try_get("added").map_err(map_column_error)?;
    let priority: i64 = row.try_get("priority").map_err(map_column_error)?;
    let revision: i64 = row.try_get("revision").map_err(map_column_error)?;
    let timemodified: i64 = row.try_get("timemodified").map_err(map_column_error)?;
    let path: Option<String> = row.try_get("path").map_err(map_column_error)?;
    let is_external_file: i64 = row.try_get("is_external_file").map_err(map_column_error)?;
    let repository_type: Option<String> =
        row.try_get("repository_type").map_err(map_column_error)?;
    let links_json: String = row.try_get("links").map_err(map_column_error)?;

    let links: Vec<ComponentLink> = serde_json::from_str(&links_json)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(QueueEntry {
        site_id: SiteId::new(site_id),
        file_id: FileId::new(file_id),
        url,
        added,
        priority,
        revision,
        timemodified,
        path,
        is_external_file: is_external_file != 0,
        repository_type,
        links,
    })
}

fn map_column_error(e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("Column read error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteQueueStore {
        let pool = crate::setup::setup_test_database().await.unwrap();
        SqliteQueueStore::new(pool)
    }

    fn entry(file_id: &str, priority: i64, added: i64) -> QueueEntry {
        QueueEntry {
            site_id: SiteId::new("site1"),
            file_id: FileId::new(file_id),
            url: format!("https://school.example/{file_id}"),
            added,
            priority,
            revision: 0,
            timemodified: 0,
            path: None,
            is_external_file: false,
            repository_type: None,
            links: vec![ComponentLink::new("mod_page", Some("4"))],
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_round_trips_links() {
        let store = store().await;
        let mut e = entry("a_0011223344556677", 300, 1_000);
        e.links.push(ComponentLink::new("mod_forum", Some("9")));
        e.path = Some("mod_scorm/content/a.html".to_string());

        store.upsert(&e).await.unwrap();

        let fetched = store
            .get(&e.site_id, &e.file_id)
            .await
            .unwrap()
            .expect("entry should exist");
        assert_eq!(fetched, e);
    }

    #[tokio::test]
    async fn test_next_orders_by_priority_then_age() {
        let store = store().await;

        store.upsert(&entry("low_00112233445566", 0, 500)).await.unwrap();
        store
            .upsert(&entry("high_old_001122334", 999, 1_000))
            .await
            .unwrap();
        store
            .upsert(&entry("high_new_001122334", 999, 2_000))
            .await
            .unwrap();

        let first = store.next().await.unwrap().expect("queue has entries");
        assert_eq!(first.file_id.as_str(), "high_old_001122334");
        store.remove(&first.site_id, &first.file_id).await.unwrap();

        let second = store.next().await.unwrap().expect("queue has entries");
        assert_eq!(second.file_id.as_str(), "high_new_001122334");
        store.remove(&second.site_id, &second.file_id).await.unwrap();

        let third = store.next().await.unwrap().expect("queue has entries");
        assert_eq!(third.file_id.as_str(), "low_00112233445566");
        store.remove(&third.site_id, &third.file_id).await.unwrap();

        assert!(store.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_instead_of_duplicating() {
        let store = store().await;
        let mut e = entry("a_0011223344556677", 100, 1_000);

        store.upsert(&e).await.unwrap();
        e.priority = 500;
        e.links.push(ComponentLink::new("mod_forum", Some("9")));
        store.upsert(&e).await.unwrap();

        let fetched = store.get(&e.site_id, &e.file_id).await.unwrap().unwrap();
        assert_eq!(fetched.priority, 500);
        assert_eq!(fetched.links.len(), 2);

        store.remove(&e.site_id, &e.file_id).await.unwrap();
        assert!(store.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_absent_entry_is_ok() {
        let store = store().await;
        store
            .remove(&SiteId::new("site1"), &FileId::new("missing_0011223344"))
            .await
            .unwrap();
    }
}
