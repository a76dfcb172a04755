//! Progress reporting for file and package downloads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A progress snapshot for one transfer, or for a whole package when the
/// engine aggregates per-file progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Bytes transferred so far.
    pub loaded: u64,
    /// Total bytes, when the server announced a length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Create a snapshot with a known total.
    #[must_use]
    pub const fn new(loaded: u64, total: u64) -> Self {
        Self {
            loaded,
            total: Some(total),
        }
    }

    /// Create a snapshot for a transfer of unknown length.
    #[must_use]
    pub const fn indeterminate(loaded: u64) -> Self {
        Self {
            loaded,
            total: None,
        }
    }

    /// Progress percentage (0.0 - 100.0), when the total is known and
    /// non-zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.loaded as f64 / total as f64) * 100.0),
            _ => None,
        }
    }
}

/// Callback invoked with progress snapshots during a transfer.
///
/// Shared and cloned freely; implementations must not block.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_with_known_total() {
        let progress = DownloadProgress::new(500, 1000);
        let pct = progress.percentage().unwrap();
        assert!((pct - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_percentage_unknown_total() {
        assert!(DownloadProgress::indeterminate(500).percentage().is_none());
        assert!(DownloadProgress::new(0, 0).percentage().is_none());
    }

    #[test]
    fn test_total_omitted_when_unknown() {
        let json = serde_json::to_string(&DownloadProgress::indeterminate(10)).unwrap();
        assert!(!json.contains("total"));
    }
}
