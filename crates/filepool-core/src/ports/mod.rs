//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the engine expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` or `reqwest` types in any signature
//! - Stores return `Option` for absent rows instead of erroring
//! - Intent-based methods, not generic CRUD

pub mod event_emitter;
pub mod file_fetcher;
pub mod file_store;
pub mod file_system;
pub mod network;
pub mod package_store;
pub mod plugin_file;
pub mod queue_store;

use std::sync::Arc;

use thiserror::Error;

pub use event_emitter::{FilepoolEventEmitterPort, NoopEmitter};
pub use file_fetcher::{FetchedFile, FileFetcherPort, RemoteFileInfo};
pub use file_store::FileStorePort;
pub use file_system::{FileSystemPort, TokioFileSystem};
pub use network::{AlwaysOnline, Connectivity, NetworkStatusPort};
pub use package_store::PackageStorePort;
pub use plugin_file::{
    DefaultPluginFileStrategy, DownloadableCheck, PluginFileArgs, PluginFileStrategy,
    StrategyRegistry,
};
pub use queue_store::QueueStorePort;

/// Container for all persistence ports, injected into the engine.
///
/// Wraps each store in an `Arc<dyn Port>` so adapters and the engine
/// share the same instances. Built by a storage adapter factory:
///
/// ```ignore
/// // In filepool-db:
/// pub fn build_stores(pool: &SqlitePool) -> Stores { ... }
///
/// // In application bootstrap:
/// let stores = filepool_db::StoreFactory::build_stores(&pool);
/// let engine = Filepool::new(config, stores, ...);
/// ```
#[derive(Clone)]
pub struct Stores {
    /// Pool file metadata and component links.
    pub files: Arc<dyn FileStorePort>,
    /// Pending download queue.
    pub queue: Arc<dyn QueueStorePort>,
    /// Package (file bundle) status records.
    pub packages: Arc<dyn PackageStorePort>,
}

impl Stores {
    /// Create a new store container.
    pub fn new(
        files: Arc<dyn FileStorePort>,
        queue: Arc<dyn QueueStorePort>,
        packages: Arc<dyn PackageStorePort>,
    ) -> Self {
        Self {
            files,
            queue,
            packages,
        }
    }
}

/// Errors for metadata store operations.
///
/// This error type abstracts away storage implementation details (e.g.,
/// sqlx errors) and provides a clean interface for the engine to handle
/// storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error (database, filesystem, etc.).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for crate::errors::FilepoolError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}
