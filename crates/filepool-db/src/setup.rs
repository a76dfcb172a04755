//! Database setup and initialization.
//!
//! This module provides the `setup_database()` function for initializing
//! the `SQLite` database with full schema. Entry points call this with the
//! resolved database path.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use std::path::Path;

/// Sets up the `SQLite` database connection and ensures the schema exists.
///
/// This function:
/// 1. Establishes a connection to the `SQLite` database file
/// 2. Creates the database file if it doesn't exist
/// 3. Creates all tables and indexes
///
/// # Arguments
///
/// * `db_path` - Path to the `SQLite` database file
///
/// # Errors
///
/// Returns an error if:
/// - The database file cannot be opened or created
/// - Schema creation fails
///
/// # Example
///
/// ```rust,no_run
/// use filepool_db::setup_database;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let db_path = Path::new("/path/to/filepool.db");
/// let pool = setup_database(db_path).await?;
/// # Ok(())
/// # }
/// ```
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true),
    )
    .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Sets up an in-memory `SQLite` database for testing.
///
/// Creates a fresh in-memory database with the full production schema.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// This function creates all tables and indexes required by the engine.
/// It is safe to call multiple times as all operations use IF NOT EXISTS.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // File metadata: one row per file present in the pool
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            site_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            url TEXT NOT NULL,
            path TEXT NOT NULL,
            extension TEXT,
            revision INTEGER NOT NULL DEFAULT 0,
            timemodified INTEGER NOT NULL DEFAULT 0,
            is_external_file INTEGER NOT NULL DEFAULT 0,
            repository_type TEXT,
            stale INTEGER NOT NULL DEFAULT 0,
            download_time INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (site_id, file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Component links: which components reference which pooled files
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            site_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            component TEXT NOT NULL,
            component_id TEXT NOT NULL,
            PRIMARY KEY (site_id, file_id, component, component_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_links_component
        ON links (site_id, component, component_id)
        "#,
    )
    .execute(pool)
    .await?;

    // Persistent download queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue (
            site_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            url TEXT NOT NULL,
            added INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            revision INTEGER NOT NULL DEFAULT 0,
            timemodified INTEGER NOT NULL DEFAULT 0,
            path TEXT,
            is_external_file INTEGER NOT NULL DEFAULT 0,
            repository_type TEXT,
            links TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (site_id, file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_queue_order
        ON queue (priority DESC, added ASC)
        "#,
    )
    .execute(pool)
    .await?;

    // Package status rows for multi-file bundles
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packages (
            site_id TEXT NOT NULL,
            package_id TEXT NOT NULL,
            component TEXT NOT NULL,
            component_id TEXT NOT NULL,
            status TEXT NOT NULL,
            previous TEXT,
            updated INTEGER NOT NULL DEFAULT 0,
            download_time INTEGER NOT NULL DEFAULT 0,
            previous_download_time INTEGER NOT NULL DEFAULT 0,
            extra TEXT,
            PRIMARY KEY (site_id, package_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_test_database() {
        let pool = setup_test_database().await.unwrap();

        // Verify tables exist by querying them
        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files")
            .fetch_one(&pool)
            .await
            .unwrap();

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM links")
            .fetch_one(&pool)
            .await
            .unwrap();

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue")
            .fetch_one(&pool)
            .await
            .unwrap();

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM packages")
            .fetch_one(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_setup_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("filepool.db");

        let pool = setup_database(&db_path).await.unwrap();

        assert!(db_path.exists());

        // Schema must be applied on the file-backed database too
        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue")
            .fetch_one(&pool)
            .await
            .unwrap();
    }
}
