//! Domain types for the file pool: identities, metadata entries, queue
//! entries and package entries.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Value stored for a component instance id when the caller supplied none.
pub const UNKNOWN_COMPONENT_ID: &str = "-1";

/// Files at or below this size (bytes) may be queued on any connection.
pub const DOWNLOAD_THRESHOLD: u64 = 2_097_152;

/// Files at or below this size (bytes) may be queued on an unmetered
/// connection. Anything larger is never queued automatically.
pub const WIFI_DOWNLOAD_THRESHOLD: u64 = 20_971_520;

/// Identifier of the site a file belongs to.
///
/// Every pooled file, link, queue entry and package is scoped to a site so
/// that several accounts can share one database without collisions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    /// Create a site id from its raw string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a pooled file, derived from its normalized URL.
///
/// The string has the shape `<readable-name>_<16 hex chars>`: a
/// human-readable prefix guessed from the URL plus a short content hash of
/// the normalized URL. The readable part exists purely for debugging
/// on-device storage; uniqueness comes from the hash suffix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Wrap an already-derived file id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw string form, used as the on-disk file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a package, derived from its component and component id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Derive the package id for a component instance.
    ///
    /// The component id is normalized first, so `None` and `Some("-1")`
    /// produce the same package.
    #[must_use]
    pub fn for_component(component: &str, component_id: Option<&str>) -> Self {
        let normalized = normalize_component_id(component_id);
        Self(short_hash(&format!("{component}#{normalized}")))
    }

    /// The raw string form, used as the database key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short content hash used for file and package identities.
///
/// Returns the first 16 hex characters (8 bytes) of the SHA-256 of the
/// input. Long enough to make collisions between URLs of one site
/// implausible, short enough to keep file names readable.
#[must_use]
pub fn short_hash(input: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    digest[..16].to_string()
}

/// Normalize a caller-supplied component instance id.
///
/// Missing and empty ids map to [`UNKNOWN_COMPONENT_ID`]; numeric ids are
/// canonicalized (`"007"` becomes `"7"`); anything else is kept verbatim.
#[must_use]
pub fn normalize_component_id(component_id: Option<&str>) -> String {
    match component_id {
        None => UNKNOWN_COMPONENT_ID.to_string(),
        Some(raw) if raw.is_empty() => UNKNOWN_COMPONENT_ID.to_string(),
        Some(raw) => raw
            .parse::<i64>()
            .map_or_else(|_| raw.to_string(), |n| n.to_string()),
    }
}

/// A component reference to a pooled file.
///
/// Components declare interest in files through links; a file with no
/// remaining links is an orphan and may be pruned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentLink {
    /// Owning component, e.g. a course module type.
    pub component: String,
    /// Instance of the component, already normalized.
    pub component_id: String,
}

impl ComponentLink {
    /// Create a link, normalizing the component id.
    pub fn new(component: impl Into<String>, component_id: Option<&str>) -> Self {
        Self {
            component: component.into(),
            component_id: normalize_component_id(component_id),
        }
    }
}

/// Descriptor for a remote file as supplied by callers or produced by a
/// plugin strategy's URL fix-up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Source URL of the file.
    pub url: String,
    /// Server-side modification time in epoch seconds. Zero when unknown.
    pub timemodified: i64,
    /// Size in bytes when the caller already knows it.
    pub size: Option<u64>,
    /// Server-reported file name, used when laying files out in a package
    /// directory.
    pub file_name: Option<String>,
    /// Server-reported directory inside the package ("/" means the root).
    pub file_path: Option<String>,
    /// True when the file lives in an external repository and the server
    /// cannot report a meaningful revision for it.
    pub is_external_file: bool,
    /// Repository type for external files ("external" disables re-download
    /// heuristics entirely).
    pub repository_type: Option<String>,
}

impl RemoteFile {
    /// Create a descriptor with unknown modification time and size.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timemodified: 0,
            size: None,
            file_name: None,
            file_path: None,
            is_external_file: false,
            repository_type: None,
        }
    }

    /// Set the known modification time (epoch seconds).
    #[must_use]
    pub const fn with_timemodified(mut self, timemodified: i64) -> Self {
        self.timemodified = timemodified;
        self
    }

    /// Set the known size in bytes.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the server-reported file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Set the directory the file occupies inside its package.
    #[must_use]
    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Mark the file as sourced from an external repository.
    #[must_use]
    pub fn with_external_repository(mut self, repository_type: impl Into<String>) -> Self {
        self.is_external_file = true;
        self.repository_type = Some(repository_type.into());
        self
    }
}

/// Per-call metadata accompanying a download, resolution or state request.
///
/// The component fields tie the file to its owner for link bookkeeping;
/// the revision and timemodified fields seed staleness checks; the size
/// gate flags control whether a queue request may be rejected for being
/// too large for the current connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileOptions {
    /// Owning component, when the caller wants a link recorded.
    pub component: Option<String>,
    /// Instance identifier inside the component.
    pub component_id: Option<String>,
    /// Known modification time in epoch seconds. Zero when unknown.
    pub timemodified: i64,
    /// Explicit revision. When absent the revision is parsed from the URL.
    pub revision: Option<i64>,
    /// Apply the size gate before queueing. On by default.
    pub check_size: bool,
    /// Queue files whose size cannot be determined (unmetered networks
    /// only).
    pub download_unknown: bool,
    /// True when the file lives in an external repository.
    pub is_external_file: bool,
    /// Repository type for external files.
    pub repository_type: Option<String>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            component: None,
            component_id: None,
            timemodified: 0,
            revision: None,
            check_size: true,
            download_unknown: false,
            is_external_file: false,
            repository_type: None,
        }
    }
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute the file to a component instance.
    #[must_use]
    pub fn with_component(
        mut self,
        component: impl Into<String>,
        component_id: Option<&str>,
    ) -> Self {
        self.component = Some(component.into());
        self.component_id = component_id.map(str::to_owned);
        self
    }

    /// Seed the staleness check with a known modification time.
    #[must_use]
    pub const fn with_timemodified(mut self, timemodified: i64) -> Self {
        self.timemodified = timemodified;
        self
    }

    /// Seed the staleness check with an explicit revision.
    #[must_use]
    pub const fn with_revision(mut self, revision: i64) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Enable or disable the size gate.
    #[must_use]
    pub const fn with_check_size(mut self, check_size: bool) -> Self {
        self.check_size = check_size;
        self
    }

    /// Allow queueing files of unknown size on unmetered networks.
    #[must_use]
    pub const fn with_download_unknown(mut self, download_unknown: bool) -> Self {
        self.download_unknown = download_unknown;
        self
    }

    /// Mark the file as sourced from an external repository.
    #[must_use]
    pub fn with_external_repository(mut self, repository_type: impl Into<String>) -> Self {
        self.is_external_file = true;
        self.repository_type = Some(repository_type.into());
        self
    }

    /// Component link derived from the component fields, if any.
    pub fn component_link(&self) -> Option<ComponentLink> {
        self.component
            .as_ref()
            .map(|component| ComponentLink::new(component.clone(), self.component_id.as_deref()))
    }
}

/// Metadata row for a file that has been downloaded into the pool.
///
/// Invariant: an entry implies the bytes exist at `path`, or the entry is
/// about to be removed. The bytes are always written before the entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Derived identity; also the on-disk file name (without extension).
    pub file_id: FileId,
    /// Last URL the file was downloaded from.
    pub url: String,
    /// On-disk path relative to the engine's data root, with `/`
    /// separators.
    pub path: String,
    /// File extension without the dot, when one could be determined.
    pub extension: Option<String>,
    /// Revision the file was downloaded at. Zero when unknown.
    pub revision: i64,
    /// Server-side modification time in epoch seconds. Zero when unknown.
    pub timemodified: i64,
    /// Whether the file lives in an external repository. External files
    /// have weaker update detection.
    pub is_external_file: bool,
    /// Repository type for external files.
    pub repository_type: Option<String>,
    /// Explicit flag forcing a freshness re-check on next access.
    pub stale: bool,
    /// When the file was downloaded, in epoch milliseconds.
    pub download_time: i64,
}

impl FileEntry {
    /// Whether the entry is outdated with respect to the revision and
    /// modification time supplied by the caller.
    ///
    /// A positive `timemodified` always takes precedence: the entry is
    /// outdated when the supplied value is strictly newer than the stored
    /// one (falling back to the download time, in seconds, when the entry
    /// never recorded a modification time). Only when no modification time
    /// is supplied does the revision comparison apply. The two signals are
    /// never combined.
    #[must_use]
    pub const fn is_outdated(&self, revision: i64, timemodified: i64) -> bool {
        if self.stale {
            return true;
        }

        if timemodified > 0 {
            let stored = if self.timemodified > 0 {
                self.timemodified
            } else {
                self.download_time / 1000
            };

            timemodified > stored
        } else {
            revision > self.revision
        }
    }

    /// Whether nothing in the entry allows update detection: external
    /// files, and files with neither a revision nor a modification time.
    #[must_use]
    pub const fn is_update_unknown(&self) -> bool {
        self.is_external_file || (self.revision == 0 && self.timemodified == 0)
    }
}

/// Row in the links table tying a pooled file to a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    /// The linked file.
    pub file_id: FileId,
    /// Owning component.
    pub component: String,
    /// Component instance, normalized.
    pub component_id: String,
}

impl LinkEntry {
    /// Create a link row for a file.
    pub fn new(file_id: FileId, link: ComponentLink) -> Self {
        Self {
            file_id,
            component: link.component,
            component_id: link.component_id,
        }
    }

    /// The component part of this row.
    #[must_use]
    pub fn component_link(&self) -> ComponentLink {
        ComponentLink {
            component: self.component.clone(),
            component_id: self.component_id.clone(),
        }
    }
}

/// A pending download in the persistent queue.
///
/// At most one entry exists per `(site_id, file_id)`; re-adding merges
/// into the existing row instead of duplicating it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Site the download belongs to.
    pub site_id: SiteId,
    /// Identity of the file to download.
    pub file_id: FileId,
    /// URL to download from.
    pub url: String,
    /// When the entry was first added, in epoch milliseconds. Older
    /// entries win ties between equal priorities.
    pub added: i64,
    /// Priority, 0–999. Higher runs first.
    pub priority: i64,
    /// Expected revision. Zero when unknown.
    pub revision: i64,
    /// Expected modification time in epoch seconds. Zero when unknown.
    pub timemodified: i64,
    /// Optional destination path override, relative to the pool folder.
    pub path: Option<String>,
    /// Whether the file lives in an external repository.
    pub is_external_file: bool,
    /// Repository type for external files.
    pub repository_type: Option<String>,
    /// Component links to record once the download succeeds.
    pub links: Vec<ComponentLink>,
}

impl QueueEntry {
    /// Merge a re-added request into this entry.
    ///
    /// Priority keeps the maximum, links are unioned, and the remaining
    /// metadata takes the incoming value when it is known. Returns whether
    /// anything changed, so callers can skip a pointless write.
    pub fn merge(&mut self, incoming: &Self) -> bool {
        let mut changed = false;

        if incoming.priority > self.priority {
            self.priority = incoming.priority;
            changed = true;
        }

        if incoming.revision != 0 && incoming.revision != self.revision {
            self.revision = incoming.revision;
            changed = true;
        }

        if incoming.timemodified != 0 && incoming.timemodified != self.timemodified {
            self.timemodified = incoming.timemodified;
            changed = true;
        }

        if incoming.path.is_some() && incoming.path != self.path {
            self.path = incoming.path.clone();
            changed = true;
        }

        if incoming.is_external_file != self.is_external_file {
            self.is_external_file = incoming.is_external_file;
            changed = true;
        }

        if incoming.repository_type.is_some() && incoming.repository_type != self.repository_type {
            self.repository_type = incoming.repository_type.clone();
            changed = true;
        }

        for link in &incoming.links {
            if !self.links.contains(link) {
                self.links.push(link.clone());
                changed = true;
            }
        }

        changed
    }
}

/// Status row for a package (a multi-file bundle owned by a component).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Derived identity of the package.
    pub id: PackageId,
    /// Owning component.
    pub component: String,
    /// Component instance, normalized.
    pub component_id: String,
    /// Current status.
    pub status: crate::status::DownloadStatus,
    /// Status before the last transition, used to roll back a failed
    /// download.
    pub previous: Option<crate::status::DownloadStatus>,
    /// When the status last changed, in epoch milliseconds.
    pub updated: i64,
    /// When the package last started downloading, in epoch seconds.
    pub download_time: i64,
    /// Download time before the current one, restored on rollback.
    pub previous_download_time: i64,
    /// Opaque component-defined payload, e.g. a content hash.
    pub extra: Option<String>,
}
