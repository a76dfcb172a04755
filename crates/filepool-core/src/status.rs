//! Download status of files and packages, and the reducer that aggregates
//! several package statuses into one.

use serde::{Deserialize, Serialize};

/// Status of a pooled file or a package.
///
/// The same scale is used for single files and for packages; a package's
/// status is the aggregate of its files' statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Present locally and believed fresh.
    Downloaded,
    /// A transfer is in flight or queued.
    Downloading,
    /// Not present locally.
    NotDownloaded,
    /// Present locally but the server has newer content.
    Outdated,
    /// Cannot be downloaded at all.
    NotDownloadable,
}

impl DownloadStatus {
    /// Convert to string representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Downloading => "downloading",
            Self::NotDownloaded => "not_downloaded",
            Self::Outdated => "outdated",
            Self::NotDownloadable => "not_downloadable",
        }
    }

    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "downloaded" => Self::Downloaded,
            "downloading" => Self::Downloading,
            "outdated" => Self::Outdated,
            "not_downloadable" => Self::NotDownloadable,
            // "not_downloaded" or unknown values default to NotDownloaded
            _ => Self::NotDownloaded,
        }
    }

    /// Whether local content exists for this status.
    #[must_use]
    pub const fn has_local_content(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Outdated)
    }
}

/// Fold one package's status into the aggregate of the packages seen so
/// far.
///
/// Pass `None` as the current aggregate for the first package. The rules,
/// applied in order:
///
/// - any not-downloaded package makes the whole set not-downloaded;
/// - downloaded only replaces the not-downloadable seed;
/// - downloading absorbs downloaded and not-downloadable;
/// - outdated absorbs everything except not-downloaded.
#[must_use]
pub fn determine_packages_status(
    current: Option<DownloadStatus>,
    package: DownloadStatus,
) -> DownloadStatus {
    let current = current.unwrap_or(DownloadStatus::NotDownloadable);

    match package {
        DownloadStatus::NotDownloaded => DownloadStatus::NotDownloaded,
        DownloadStatus::Downloaded if current == DownloadStatus::NotDownloadable => {
            DownloadStatus::Downloaded
        }
        DownloadStatus::Downloading
            if matches!(
                current,
                DownloadStatus::NotDownloadable | DownloadStatus::Downloaded
            ) =>
        {
            DownloadStatus::Downloading
        }
        DownloadStatus::Outdated if current != DownloadStatus::NotDownloaded => {
            DownloadStatus::Outdated
        }
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_strings() {
        for status in [
            DownloadStatus::Downloaded,
            DownloadStatus::Downloading,
            DownloadStatus::NotDownloaded,
            DownloadStatus::Outdated,
            DownloadStatus::NotDownloadable,
        ] {
            assert_eq!(DownloadStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_parse_unknown_defaults_to_not_downloaded() {
        assert_eq!(
            DownloadStatus::parse("garbage"),
            DownloadStatus::NotDownloaded
        );
    }

    fn reduce(statuses: &[DownloadStatus]) -> DownloadStatus {
        statuses
            .iter()
            .fold(None, |acc, s| Some(determine_packages_status(acc, *s)))
            .unwrap_or(DownloadStatus::NotDownloadable)
    }

    #[test]
    fn test_not_downloaded_dominates() {
        assert_eq!(
            reduce(&[
                DownloadStatus::Downloaded,
                DownloadStatus::NotDownloaded,
                DownloadStatus::Outdated,
            ]),
            DownloadStatus::NotDownloaded
        );
    }

    #[test]
    fn test_downloaded_only_replaces_not_downloadable() {
        assert_eq!(
            reduce(&[DownloadStatus::Downloaded]),
            DownloadStatus::Downloaded
        );
        assert_eq!(
            reduce(&[DownloadStatus::Downloading, DownloadStatus::Downloaded]),
            DownloadStatus::Downloading
        );
    }

    #[test]
    fn test_outdated_absorbs_downloading() {
        assert_eq!(
            reduce(&[
                DownloadStatus::Downloaded,
                DownloadStatus::Downloading,
                DownloadStatus::Outdated,
            ]),
            DownloadStatus::Outdated
        );
    }

    #[test]
    fn test_all_not_downloadable() {
        assert_eq!(
            reduce(&[
                DownloadStatus::NotDownloadable,
                DownloadStatus::NotDownloadable,
            ]),
            DownloadStatus::NotDownloadable
        );
    }

    #[test]
    fn test_order_does_not_matter_for_not_downloaded() {
        assert_eq!(
            reduce(&[
                DownloadStatus::NotDownloaded,
                DownloadStatus::Downloading,
                DownloadStatus::Downloaded,
            ]),
            DownloadStatus::NotDownloaded
        );
    }
}
