//! File fetcher port definition.
//!
//! Abstracts the HTTP client used to probe and download remote files.
//! Implementations classify transport failures into the [`FilepoolError`]
//! taxonomy so the queue can tell permanent failures from interrupted
//! transfers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::FilepoolResult;
use crate::progress::ProgressCallback;

/// What a size probe learned about a remote file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileInfo {
    /// Size in bytes, when the server announced one.
    pub size: Option<u64>,
    /// Declared content type, when the server announced one.
    pub mime_type: Option<String>,
}

/// A completed transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedFile {
    /// Where the bytes were written.
    pub path: PathBuf,
    /// Number of bytes written.
    pub size: u64,
    /// Declared content type, when the server announced one.
    pub mime_type: Option<String>,
}

/// Port for fetching remote files.
///
/// Implementations must write the destination file completely before
/// returning: a successful return means the bytes at `destination` are the
/// whole remote content. Partial files must not be left behind on failure.
#[async_trait]
pub trait FileFetcherPort: Send + Sync {
    /// Probe a remote file without downloading it.
    async fn remote_info(&self, url: &str) -> FilepoolResult<RemoteFileInfo>;

    /// Download a remote file to `destination`, creating parent
    /// directories as needed and reporting progress when a callback is
    /// given.
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<FetchedFile>;
}
