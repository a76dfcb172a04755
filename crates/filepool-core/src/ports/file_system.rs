//! Filesystem port definition.
//!
//! The engine never touches the filesystem directly; it goes through this
//! port so tests can fake storage and platforms can redirect it.

use std::path::Path;

use async_trait::async_trait;

use crate::errors::{FilepoolError, FilepoolResult};

/// Port for the local filesystem.
///
/// Removals are idempotent: deleting something that is already gone
/// succeeds. The pool self-heals dangling metadata by deleting files that
/// may or may not still exist, so "already gone" is never an error here.
#[async_trait]
pub trait FileSystemPort: Send + Sync {
    /// Create a directory and any missing parents.
    async fn ensure_dir(&self, path: &Path) -> FilepoolResult<()>;

    /// Remove a file, tolerating its absence.
    async fn remove_file(&self, path: &Path) -> FilepoolResult<()>;

    /// Remove a directory and its contents, tolerating its absence.
    async fn remove_dir(&self, path: &Path) -> FilepoolResult<()>;

    /// Size of a file in bytes. Fails if the file does not exist.
    async fn file_size(&self, path: &Path) -> FilepoolResult<u64>;

    /// Whether a file or directory exists.
    async fn exists(&self, path: &Path) -> bool;
}

/// Production filesystem backed by `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Create a new filesystem adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystemPort for TokioFileSystem {
    async fn ensure_dir(&self, path: &Path) -> FilepoolResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| FilepoolError::from_io_error(&e))
    }

    async fn remove_file(&self, path: &Path) -> FilepoolResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilepoolError::from_io_error(&e)),
        }
    }

    async fn remove_dir(&self, path: &Path) -> FilepoolResult<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilepoolError::from_io_error(&e)),
        }
    }

    async fn file_size(&self, path: &Path) -> FilepoolResult<u64> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| FilepoolError::from_io_error(&e))?;

        Ok(metadata.len())
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_file_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();

        let path = dir.path().join("missing.bin");
        fs.remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_dir_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();

        let nested = dir.path().join("a/b/c");
        fs.ensure_dir(&nested).await.unwrap();
        assert!(fs.exists(&nested).await);

        let file = nested.join("f.bin");
        tokio::fs::write(&file, b"12345").await.unwrap();
        assert_eq!(fs.file_size(&file).await.unwrap(), 5);

        fs.remove_dir(&nested).await.unwrap();
        assert!(!fs.exists(&file).await);
        // A second removal is fine.
        fs.remove_dir(&nested).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_size_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();

        let err = fs.file_size(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, FilepoolError::Filesystem { .. }));
    }
}
