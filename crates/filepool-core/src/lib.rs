#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod errors;
pub mod events;
pub mod paths;
pub mod ports;
pub mod progress;
pub mod status;
pub mod time;
pub mod types;

// Re-export commonly used types for convenience
pub use errors::{FilepoolError, FilepoolResult};
pub use events::{FileAction, FilepoolEvent};
pub use paths::{
    FILEPOOL_FOLDER, file_path, filepool_folder_path, package_dir_path, site_folder_path,
};
pub use ports::{
    AlwaysOnline, Connectivity, DefaultPluginFileStrategy, DownloadableCheck, FetchedFile,
    FileFetcherPort, FileStorePort, FileSystemPort, FilepoolEventEmitterPort, NetworkStatusPort,
    NoopEmitter, PackageStorePort, PluginFileArgs, PluginFileStrategy, QueueStorePort,
    RemoteFileInfo, StoreError, Stores, StrategyRegistry, TokioFileSystem,
};
pub use progress::{DownloadProgress, ProgressCallback};
pub use status::{DownloadStatus, determine_packages_status};
pub use time::{now_millis, now_seconds};
pub use types::{
    ComponentLink, DOWNLOAD_THRESHOLD, FileEntry, FileId, FileOptions, LinkEntry, PackageEntry,
    PackageId, QueueEntry, RemoteFile, SiteId, UNKNOWN_COMPONENT_ID, WIFI_DOWNLOAD_THRESHOLD,
    normalize_component_id, short_hash,
};

// Silence unused dev-dependency warnings until we add mock-based tests
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tokio_test as _;
