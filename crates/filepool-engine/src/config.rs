//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use filepool_core::{DOWNLOAD_THRESHOLD, WIFI_DOWNLOAD_THRESHOLD};

/// Tunables for the download engine.
///
/// Defaults are conservative: files over 2 MB are not auto-queued on a
/// metered connection, files over 20 MB not even on Wi-Fi, and the queue
/// drains back to back without pausing between items.
#[derive(Clone, Debug)]
pub struct FilepoolConfig {
    /// Root directory holding every site's pool folder.
    pub data_root: PathBuf,
    /// Pause between queue items. Zero drains the queue as fast as the
    /// network allows.
    pub queue_process_interval: Duration,
    /// Largest file auto-queued regardless of connection type, in bytes.
    pub download_threshold: u64,
    /// Largest file auto-queued on an unmetered connection, in bytes.
    pub wifi_download_threshold: u64,
}

impl Default for FilepoolConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            queue_process_interval: Duration::ZERO,
            download_threshold: DOWNLOAD_THRESHOLD,
            wifi_download_threshold: WIFI_DOWNLOAD_THRESHOLD,
        }
    }
}

impl FilepoolConfig {
    /// Configuration rooted at `data_root`, everything else default.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Set the pause between queue items.
    #[must_use]
    pub const fn with_queue_process_interval(mut self, interval: Duration) -> Self {
        self.queue_process_interval = interval;
        self
    }

    /// Set the auto-download ceiling for metered connections.
    #[must_use]
    pub const fn with_download_threshold(mut self, bytes: u64) -> Self {
        self.download_threshold = bytes;
        self
    }

    /// Set the auto-download ceiling for unmetered connections.
    #[must_use]
    pub const fn with_wifi_download_threshold(mut self, bytes: u64) -> Self {
        self.wifi_download_threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FilepoolConfig::default();
        assert_eq!(config.download_threshold, DOWNLOAD_THRESHOLD);
        assert_eq!(config.wifi_download_threshold, WIFI_DOWNLOAD_THRESHOLD);
        assert!(config.queue_process_interval.is_zero());
    }

    #[test]
    fn test_builders() {
        let config = FilepoolConfig::new("/tmp/pool")
            .with_download_threshold(1024)
            .with_queue_process_interval(Duration::from_millis(50));
        assert_eq!(config.data_root, PathBuf::from("/tmp/pool"));
        assert_eq!(config.download_threshold, 1024);
        assert_eq!(config.queue_process_interval, Duration::from_millis(50));
    }
}
