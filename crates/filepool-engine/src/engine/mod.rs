//! The file pool engine.
//!
//! [`Filepool`] coordinates identity resolution, the persistent download
//! queue, component links, staleness and package tracking over injected
//! ports. One instance serves any number of sites; every operation is
//! site-scoped. Construction wires the ports, [`Filepool::initialize`]
//! marks the pool usable and starts the queue runner.

mod download;
mod packages;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tracing::{debug, warn};

use filepool_core::{
    ComponentLink, DownloadStatus, FileAction, FileEntry, FileFetcherPort, FileId, FileOptions,
    FileSystemPort, FilepoolError, FilepoolEvent, FilepoolEventEmitterPort, FilepoolResult,
    LinkEntry, NetworkStatusPort, PackageId, PluginFileArgs, ProgressCallback, RemoteFile, SiteId,
    Stores, StrategyRegistry, normalize_component_id, paths,
};

use crate::config::FilepoolConfig;
use crate::identity;
use crate::queue::QueueWaiters;

/// Outcome of resolving a URL against the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedUrl {
    /// The file is pooled and fresh enough; open it from here.
    Local(PathBuf),
    /// Not pooled, or stale while online; fetch from the source.
    Remote(String),
}

impl ResolvedUrl {
    /// Whether the pooled copy is being served.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Result shared between concurrent callers of one in-flight transfer.
type TransferResult = FilepoolResult<FileEntry>;

/// In-flight transfer broadcast slots, keyed by site and transfer id.
type TransferMap = HashMap<(SiteId, String), watch::Sender<Option<TransferResult>>>;

/// In-flight package download broadcast slots.
type PackageMap = HashMap<(SiteId, PackageId), watch::Sender<Option<FilepoolResult<()>>>>;

/// The download pool engine.
///
/// Cheap to share behind an [`Arc`]; the queue runner and every waiter
/// hold clones of the same instance.
pub struct Filepool {
    config: FilepoolConfig,
    stores: Stores,
    fetcher: Arc<dyn FileFetcherPort>,
    fs: Arc<dyn FileSystemPort>,
    network: Arc<dyn NetworkStatusPort>,
    emitter: Arc<dyn FilepoolEventEmitterPort>,
    strategies: StrategyRegistry,
    initialized: AtomicBool,
    /// Never reset: the runner lives for the lifetime of the engine.
    runner_started: AtomicBool,
    queue_kick: Notify,
    waiters: QueueWaiters,
    transfers: Mutex<TransferMap>,
    package_downloads: Mutex<PackageMap>,
    /// Known remote sizes, memoized for the engine's lifetime.
    size_cache: Mutex<HashMap<String, u64>>,
    /// Files a "downloaded" notification already went out for. Cache hits
    /// notify once per engine lifetime, real transfers every time.
    notified_downloads: Mutex<HashSet<(SiteId, FileId)>>,
}

impl Filepool {
    /// Wire an engine from its ports. The engine refuses work until
    /// [`Filepool::initialize`] is called.
    pub fn new(
        config: FilepoolConfig,
        stores: Stores,
        fetcher: Arc<dyn FileFetcherPort>,
        fs: Arc<dyn FileSystemPort>,
        network: Arc<dyn NetworkStatusPort>,
        emitter: Arc<dyn FilepoolEventEmitterPort>,
        strategies: StrategyRegistry,
    ) -> Self {
        Self {
            config,
            stores,
            fetcher,
            fs,
            network,
            emitter,
            strategies,
            initialized: AtomicBool::new(false),
            runner_started: AtomicBool::new(false),
            queue_kick: Notify::new(),
            waiters: QueueWaiters::default(),
            transfers: Mutex::new(HashMap::new()),
            package_downloads: Mutex::new(HashMap::new()),
            size_cache: Mutex::new(HashMap::new()),
            notified_downloads: Mutex::new(HashSet::new()),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &FilepoolConfig {
        &self.config
    }

    /// The strategy registry the engine resolves content plugins from.
    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// Mark the pool usable and start the queue runner.
    ///
    /// Idempotent. Entries left in the queue by a previous run start
    /// processing immediately.
    pub fn initialize(self: &Arc<Self>) {
        self.initialized.store(true, Ordering::SeqCst);
        self.ensure_runner();
        self.queue_kick.notify_one();
    }

    /// Wake the queue runner, e.g. after connectivity returned.
    pub fn run_queue(self: &Arc<Self>) {
        self.ensure_runner();
        self.queue_kick.notify_one();
    }

    /// Start the runner exactly once for the lifetime of the engine.
    fn ensure_runner(self: &Arc<Self>) {
        if self
            .runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.run_loop().await;
            });
        }
    }

    pub(crate) fn ensure_initialized(&self) -> FilepoolResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FilepoolError::Uninitialized)
        }
    }

    /// Derive the pool id a URL maps onto.
    pub fn file_id_by_url(&self, file_url: &str) -> FileId {
        identity::file_id_for_url(&self.strategies, file_url)
    }

    /// Highest revision across a file list, extracted per the strategies.
    pub fn revision_from_file_list(&self, files: &[RemoteFile]) -> i64 {
        identity::revision_from_file_list(&self.strategies, files)
    }

    // ---- State ----------------------------------------------------------

    /// Download state of a URL.
    ///
    /// Checked in order: queued, transfer in flight, pooled (fresh or
    /// outdated), absent. A URL whose strategy refuses it is
    /// [`DownloadStatus::NotDownloadable`].
    pub async fn file_state_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
        options: &FileOptions,
        file_path: Option<&str>,
    ) -> FilepoolResult<DownloadStatus> {
        let file = RemoteFile::new(file_url).with_timemodified(options.timemodified);
        let Ok(file) = self.fix_remote_file(file) else {
            return Ok(DownloadStatus::NotDownloadable);
        };

        let timemodified = if file.timemodified > 0 {
            file.timemodified
        } else {
            options.timemodified
        };
        let revision = options
            .revision
            .unwrap_or_else(|| identity::revision_from_url(&self.strategies, &file.url));
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);

        if self.stores.queue.get(site_id, &file_id).await?.is_some() {
            return Ok(DownloadStatus::Downloading);
        }

        // A direct download can be in flight without a queue entry.
        let relative = match file_path {
            Some(path) => path.to_string(),
            None => {
                let extension = identity::guess_extension_from_url(&file.url);
                paths::file_path(site_id, &file_id, extension.as_deref())
            }
        };
        if self.transfer_in_flight(site_id, &file.url, &relative) {
            return Ok(DownloadStatus::Downloading);
        }

        match self.stores.files.file(site_id, &file_id).await? {
            Some(entry) if entry.is_outdated(revision, timemodified) => {
                Ok(DownloadStatus::Outdated)
            }
            Some(_) => Ok(DownloadStatus::Downloaded),
            None => Ok(DownloadStatus::NotDownloaded),
        }
    }

    /// Whether the URL can be downloaded at all.
    pub async fn is_file_downloadable(
        &self,
        site_id: &SiteId,
        file_url: &str,
        options: &FileOptions,
    ) -> FilepoolResult<bool> {
        let state = self.file_state_by_url(site_id, file_url, options, None).await?;
        Ok(state != DownloadStatus::NotDownloadable)
    }

    /// Whether the URL currently sits in the download queue.
    pub async fn is_file_downloading_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
    ) -> FilepoolResult<bool> {
        let file_id = identity::file_id_for_url(&self.strategies, file_url);
        Ok(self.stores.queue.get(site_id, &file_id).await?.is_some())
    }

    // ---- Paths ----------------------------------------------------------

    /// Path of a file relative to the data root. Does not check the disk;
    /// the extension comes from the pool entry when one exists.
    pub async fn file_path(&self, site_id: &SiteId, file_id: &FileId) -> FilepoolResult<String> {
        let entry = self.stores.files.file(site_id, file_id).await?;
        let extension = entry.as_ref().and_then(|e| e.extension.as_deref());
        Ok(paths::file_path(site_id, file_id, extension))
    }

    /// Like [`Filepool::file_path`], starting from a URL.
    pub async fn file_path_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
    ) -> FilepoolResult<String> {
        let file = self.fix_remote_file(RemoteFile::new(file_url))?;
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        self.file_path(site_id, &file_id).await
    }

    /// Turn a pool-relative path into an absolute one under the data root.
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        self.config.data_root.join(relative)
    }

    /// Absolute path of a pooled file, verified to exist on disk.
    pub async fn local_path_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
    ) -> FilepoolResult<PathBuf> {
        self.ensure_initialized()?;
        let file = self.fix_remote_file(RemoteFile::new(file_url))?;
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        self.local_path_by_id(site_id, &file_id).await
    }

    /// `file://` URL of a pooled file, verified to exist on disk.
    pub async fn local_url_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
    ) -> FilepoolResult<String> {
        let path = self.local_path_by_url(site_id, file_url).await?;
        Ok(file_url_for_path(&path))
    }

    pub(crate) async fn local_path_by_id(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> FilepoolResult<PathBuf> {
        let relative = self.file_path(site_id, file_id).await?;
        let absolute = self.absolute_path(&relative);

        if self.fs.exists(&absolute).await {
            Ok(absolute)
        } else {
            Err(FilepoolError::not_found(format!("file {file_id} is not on disk")))
        }
    }

    // ---- Component links ------------------------------------------------

    /// Attribute a pooled or queued file to a component instance, so the
    /// component can later enumerate or release its files.
    pub async fn add_file_link(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<()> {
        if component.is_empty() {
            return Err(FilepoolError::other("cannot add a link without a component"));
        }

        let link = ComponentLink::new(component, component_id);
        self.stores
            .files
            .add_link(site_id, &LinkEntry::new(file_id.clone(), link))
            .await?;
        Ok(())
    }

    /// Like [`Filepool::add_file_link`], starting from a URL.
    pub async fn add_file_link_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<()> {
        let file = self.fix_remote_file(RemoteFile::new(file_url))?;
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        self.add_file_link(site_id, &file_id, component, component_id).await
    }

    /// Record several links, logging failures instead of propagating them:
    /// a lost link must not fail the download that produced it.
    pub(crate) async fn add_links_quietly(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        links: &[ComponentLink],
    ) {
        for link in links {
            let entry = LinkEntry::new(file_id.clone(), link.clone());
            if let Err(error) = self.stores.files.add_link(site_id, &entry).await {
                warn!(%error, file = %file_id, "failed to record component link");
            }
        }
    }

    /// Whether a component instance has any files at all.
    pub async fn component_has_files(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<bool> {
        let normalized = normalize_component_id(component_id);
        Ok(self
            .stores
            .files
            .component_has_links(site_id, component, &normalized)
            .await?)
    }

    /// Pool entries of every file linked to a component instance. Links
    /// whose file was removed in the meantime are skipped.
    pub async fn files_by_component(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<Vec<FileEntry>> {
        let normalized = normalize_component_id(component_id);
        let links = self
            .stores
            .files
            .links_for_component(site_id, component, &normalized)
            .await?;

        let mut files = Vec::with_capacity(links.len());
        for link in links {
            if let Some(entry) = self.stores.files.file(site_id, &link.file_id).await? {
                files.push(entry);
            }
        }
        Ok(files)
    }

    /// Total on-disk size of a component's files. Files missing from disk
    /// contribute nothing.
    pub async fn files_size_by_component(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<u64> {
        let files = self.files_by_component(site_id, component, component_id).await?;

        let mut total = 0;
        for entry in files {
            let absolute = self.absolute_path(&entry.path);
            if let Ok(size) = self.fs.file_size(&absolute).await {
                total += size;
            }
        }
        Ok(total)
    }

    // ---- Invalidation ---------------------------------------------------

    /// Mark one file stale. The file is not re-queued; the next access
    /// re-checks freshness and downloads if needed.
    pub async fn invalidate_file_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
    ) -> FilepoolResult<()> {
        let file = self.fix_remote_file(RemoteFile::new(file_url))?;
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        self.stores.files.set_stale(site_id, &file_id).await?;
        Ok(())
    }

    /// Mark a component instance's files stale. With `only_unknown`, only
    /// files whose updates cannot be detected are flagged; that is the
    /// cheaper choice for routine cache invalidation. Returns the number
    /// of flagged files.
    pub async fn invalidate_files_by_component(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
        only_unknown: bool,
    ) -> FilepoolResult<u64> {
        let normalized = normalize_component_id(component_id);
        let links = self
            .stores
            .files
            .links_for_component(site_id, component, &normalized)
            .await?;

        let file_ids: Vec<FileId> = links.into_iter().map(|link| link.file_id).collect();
        if file_ids.is_empty() {
            return Ok(0);
        }

        Ok(self
            .stores
            .files
            .set_stale_many(site_id, &file_ids, only_unknown)
            .await?)
    }

    /// Mark every file of a site stale, with the same `only_unknown`
    /// filter as [`Filepool::invalidate_files_by_component`].
    pub async fn invalidate_all_files(
        &self,
        site_id: &SiteId,
        only_unknown: bool,
    ) -> FilepoolResult<u64> {
        Ok(self.stores.files.set_all_stale(site_id, only_unknown).await?)
    }

    // ---- Removal --------------------------------------------------------

    /// Remove a file: its metadata, its links, and its bytes. Linked
    /// components are notified; the strategy's delete hook runs last.
    pub async fn remove_file_by_id(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> FilepoolResult<()> {
        self.ensure_initialized()?;

        // Read what notifications and hooks need before the rows go.
        let entry = self.stores.files.file(site_id, file_id).await?;
        let links: Vec<ComponentLink> = self
            .stores
            .files
            .links_for_file(site_id, file_id)
            .await?
            .into_iter()
            .map(|link| link.component_link())
            .collect();

        let extension = entry.as_ref().and_then(|e| e.extension.as_deref());
        let relative = paths::file_path(site_id, file_id, extension);
        let absolute = self.absolute_path(&relative);

        self.stores.files.remove_file(site_id, file_id).await?;
        self.stores.files.remove_links_for_file(site_id, file_id).await?;
        self.fs.remove_file(&absolute).await?;

        debug!(site = %site_id, file = %file_id, "removed file from pool");
        self.notify_file_event(site_id, file_id, FileAction::Deleted, None, &links);

        if let Some(entry) = entry {
            let args = PluginFileArgs::from_url(&entry.url);
            let strategy = self.strategies.strategy_for(args.as_ref());
            if let Err(error) = strategy.on_file_deleted(&entry.url, &absolute).await {
                warn!(%error, file = %file_id, "post-delete hook failed");
            }
        }

        Ok(())
    }

    /// Like [`Filepool::remove_file_by_id`], starting from a URL.
    pub async fn remove_file_by_url(&self, site_id: &SiteId, file_url: &str) -> FilepoolResult<()> {
        let file = self.fix_remote_file(RemoteFile::new(file_url))?;
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        self.remove_file_by_id(site_id, &file_id).await
    }

    /// Remove every file linked to a component instance.
    pub async fn remove_files_by_component(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<()> {
        self.ensure_initialized()?;
        let normalized = normalize_component_id(component_id);
        let links = self
            .stores
            .files
            .links_for_component(site_id, component, &normalized)
            .await?;

        for link in links {
            self.remove_file_by_id(site_id, &link.file_id).await?;
        }
        Ok(())
    }

    /// Drop every file and link row of a site. On-disk bytes are left for
    /// the host to clear together with the site folder.
    pub async fn clear_filepool(&self, site_id: &SiteId) -> FilepoolResult<()> {
        self.ensure_initialized()?;
        self.stores.files.clear(site_id).await?;
        Ok(())
    }

    // ---- Internal helpers -----------------------------------------------

    /// Run a file through its strategy: veto first, then URL fix-up.
    pub(crate) fn fix_remote_file(&self, file: RemoteFile) -> FilepoolResult<RemoteFile> {
        let args = PluginFileArgs::from_url(&file.url);
        let strategy = self.strategies.strategy_for(args.as_ref());

        let check = strategy.is_downloadable(&file);
        if !check.downloadable {
            return Err(FilepoolError::not_downloadable(
                check
                    .reason
                    .unwrap_or_else(|| "file vetoed by its content strategy".to_string()),
            ));
        }

        Ok(strategy.fix_url(file))
    }

    pub(crate) fn notify_file_event(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        action: FileAction,
        success: Option<bool>,
        links: &[ComponentLink],
    ) {
        self.emitter.emit(FilepoolEvent::FileStateChanged {
            site_id: site_id.clone(),
            file_id: file_id.clone(),
            action,
            success,
        });

        for link in links {
            self.emitter.emit(FilepoolEvent::component_file(
                site_id.clone(),
                link,
                file_id.clone(),
                action,
                success,
            ));
        }
    }

    pub(crate) fn notify_file_downloading(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        links: &[ComponentLink],
    ) {
        self.notify_file_event(site_id, file_id, FileAction::Downloading, None, links);
    }

    /// Notify a finished download. Real transfers always notify.
    pub(crate) fn notify_file_downloaded(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        links: &[ComponentLink],
    ) {
        self.mark_downloaded_notified(site_id, file_id);
        self.notify_file_event(site_id, file_id, FileAction::Download, Some(true), links);
    }

    /// Notify a finished download for a cache hit: only the first
    /// observation of a file in this engine's lifetime notifies.
    pub(crate) fn notify_file_downloaded_once(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        links: &[ComponentLink],
    ) {
        if self.mark_downloaded_notified(site_id, file_id) {
            self.notify_file_event(site_id, file_id, FileAction::Download, Some(true), links);
        }
    }

    pub(crate) fn notify_file_download_failed(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        links: &[ComponentLink],
    ) {
        self.notify_file_event(site_id, file_id, FileAction::Download, Some(false), links);
    }

    /// Record the downloaded notification; true on first observation.
    fn mark_downloaded_notified(&self, site_id: &SiteId, file_id: &FileId) -> bool {
        lock_unpoisoned(&self.notified_downloads).insert((site_id.clone(), file_id.clone()))
    }
}

/// Render an absolute path as a `file://` URL the host can open.
fn file_url_for_path(path: &std::path::Path) -> String {
    format!("file://{}", path.display())
}

/// Lock a mutex, recovering the data from a poisoned one. Engine maps
/// hold plain data; a panicked holder cannot leave them inconsistent.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
