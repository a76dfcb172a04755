//! Reqwest implementation of the `FileFetcherPort` trait.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use filepool_core::{
    DownloadProgress, FetchedFile, FileFetcherPort, FilepoolError, FilepoolResult,
    ProgressCallback, RemoteFileInfo,
};

/// Production file fetcher using reqwest with rustls.
///
/// Bodies stream to a `.part` file and are renamed into place after the
/// last chunk, so a failed transfer never leaves partial content at the
/// destination.
pub struct ReqwestFileFetcher {
    client: reqwest::Client,
}

impl ReqwestFileFetcher {
    /// Create a fetcher with a default client.
    ///
    /// Only the connect phase is bounded; whole-body timeouts would kill
    /// large downloads on slow links.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");

        Self { client }
    }

    /// Create a fetcher around a preconfigured client.
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestFileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileFetcherPort for ReqwestFileFetcher {
    async fn remote_info(&self, url: &str) -> FilepoolResult<RemoteFileInfo> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), url));
        }

        Ok(RemoteFileInfo {
            size: header_content_length(response.headers()),
            mime_type: header_content_type(response.headers()),
        })
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<FetchedFile> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), url));
        }

        let total = header_content_length(response.headers());
        let mime_type = header_content_type(response.headers());

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FilepoolError::from_io_error(&e))?;
        }

        let partial = partial_path(destination);
        let size = match stream_to_file(response, &partial, total, progress).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = replace_file(&partial, destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        Ok(FetchedFile {
            path: destination.to_path_buf(),
            size,
            mime_type,
        })
    }
}

/// Write the response body to `partial`, reporting progress per chunk.
async fn stream_to_file(
    response: reqwest::Response,
    partial: &Path,
    total: Option<u64>,
    progress: Option<ProgressCallback>,
) -> FilepoolResult<u64> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| FilepoolError::from_io_error(&e))?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        // A failed chunk read is an interrupted transfer, not a dead host
        let chunk =
            chunk.map_err(|e| FilepoolError::aborted(format!("transfer interrupted: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FilepoolError::from_io_error(&e))?;
        downloaded += chunk.len() as u64;

        if let Some(ref callback) = progress {
            let update = total.map_or_else(
                || DownloadProgress::indeterminate(downloaded),
                |t| DownloadProgress::new(downloaded, t),
            );
            callback(update);
        }
    }

    file.flush()
        .await
        .map_err(|e| FilepoolError::from_io_error(&e))?;

    Ok(downloaded)
}

/// Move the completed `.part` file into place, replacing any older copy.
async fn replace_file(partial: &Path, destination: &Path) -> FilepoolResult<()> {
    match tokio::fs::remove_file(destination).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(FilepoolError::from_io_error(&e)),
    }

    tokio::fs::rename(partial, destination)
        .await
        .map_err(|e| FilepoolError::from_io_error(&e))
}

/// Path of the in-flight temp file next to the destination.
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map_or_else(|| OsString::from("download"), ToOwned::to_owned);
    name.push(".part");
    destination.with_file_name(name)
}

/// Size from the Content-Length header.
///
/// Read from the header rather than `Response::content_length()` so HEAD
/// probes report the announced body size instead of the empty body.
fn header_content_length(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Content type from the headers, without parameters.
fn header_content_type(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
}

/// Map a reqwest error from sending a request.
fn classify_request_error(error: &reqwest::Error, url: &str) -> FilepoolError {
    if error.is_builder() {
        FilepoolError::invalid_url(url)
    } else if let Some(status) = error.status() {
        classify_status(status.as_u16(), url)
    } else {
        FilepoolError::connection(format!("request to {url} failed: {error}"))
    }
}

/// Map an HTTP error status.
fn classify_status(status: u16, url: &str) -> FilepoolError {
    match status {
        404 => FilepoolError::not_found(format!("no file found at {url}")),
        304 => FilepoolError::NotModified,
        _ => FilepoolError::connection_with_status(
            format!("request to {url} returned HTTP {status}"),
            status,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/data/site1/filepool/doc_00112233.pdf")),
            Path::new("/data/site1/filepool/doc_00112233.pdf.part")
        );
        assert_eq!(
            partial_path(Path::new("/data/site1/filepool/noext")),
            Path::new("/data/site1/filepool/noext.part")
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(404, "https://school.example/f"),
            FilepoolError::NotFound { .. }
        ));
        assert!(matches!(
            classify_status(304, "https://school.example/f"),
            FilepoolError::NotModified
        ));
        assert!(matches!(
            classify_status(503, "https://school.example/f"),
            FilepoolError::Connection {
                status_code: Some(503),
                ..
            }
        ));
    }

    #[test]
    fn test_header_content_type_strips_parameters() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "text/html; charset=utf-8".parse().unwrap(),
        );
        assert_eq!(
            header_content_type(&headers),
            Some("text/html".to_string())
        );
    }

    #[test]
    fn test_header_content_length_parses() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_LENGTH, "2048".parse().unwrap());
        assert_eq!(header_content_length(&headers), Some(2048));
    }

    #[tokio::test]
    async fn test_download_rejects_unparsable_url() {
        let fetcher = ReqwestFileFetcher::new();
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.bin");

        let result = fetcher
            .download("not a url at all", &destination, None)
            .await;

        assert!(result.is_err());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_download_classifies_unreachable_host_as_connection() {
        let fetcher = ReqwestFileFetcher::new();
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.bin");

        // Port 1 on loopback is never bound; connect is refused immediately
        let result = fetcher
            .download("http://127.0.0.1:1/file.bin", &destination, None)
            .await;

        assert!(matches!(result, Err(FilepoolError::Connection { .. })));
        assert!(!destination.exists());
    }
}
