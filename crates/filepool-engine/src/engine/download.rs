//! Downloads: direct, deduplicated and queued.
//!
//! Three ways into the pool share one transfer path
//! ([`Filepool::download_for_pool`]): [`Filepool::resolve_url`] serves the
//! pooled copy or queues a refresh, [`Filepool::download_url`] transfers
//! right now, and the queue runner drains persisted requests whenever the
//! device is online. Concurrent requests for the same destination share a
//! single transfer.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use filepool_core::{
    ComponentLink, FileEntry, FileId, FileOptions, FilepoolError, FilepoolResult, PluginFileArgs,
    ProgressCallback, QueueEntry, RemoteFile, SiteId, now_millis, paths, short_hash,
};

use crate::identity;
use crate::queue::QueueTicket;

use super::{Filepool, ResolvedUrl, TransferResult, lock_unpoisoned};

impl Filepool {
    // ---- Resolution -----------------------------------------------------

    /// Resolve a URL to the best source available right now.
    ///
    /// A pooled file that is fresh, or stale while offline, is served
    /// locally; the requesting component is linked to it and a
    /// "downloaded" notification goes out on the first observation of the
    /// file since the engine started. Otherwise the caller is pointed back
    /// at the source and the file is queued in the background, subject to
    /// the size policy in [`Filepool::add_to_queue_if_needed`].
    pub async fn resolve_url(
        self: &Arc<Self>,
        site_id: &SiteId,
        file_url: &str,
        options: &FileOptions,
    ) -> FilepoolResult<ResolvedUrl> {
        self.ensure_initialized()?;

        let file = self.fix_remote_file(remote_file_for_options(file_url, options))?;
        let timemodified = effective_timemodified(&file, options);
        let revision = self.effective_revision(&file, options);
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        let links: Vec<ComponentLink> = options.component_link().into_iter().collect();

        let entry = match self.stores.files.file(site_id, &file_id).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, file = %file_id, "failed to read pool entry, treating as absent");
                None
            }
        };

        if let Some(entry) = entry {
            let outdated = entry.is_outdated(revision, timemodified);
            if !(outdated && self.network.connectivity().is_online()) {
                // Serve the pooled copy. When the entry predates update
                // detection, store the modification time we now know so the
                // next check can compare against it.
                if !entry.stale && entry.timemodified == 0 && timemodified > 0 {
                    if let Err(error) = self
                        .stores
                        .files
                        .set_timemodified(site_id, &file_id, timemodified)
                        .await
                    {
                        warn!(%error, file = %file_id, "failed to backfill modification time");
                    }
                }

                let absolute = self.absolute_path(&entry.path);
                if self.fs.exists(&absolute).await {
                    self.add_links_quietly(site_id, &file_id, &links).await;
                    self.notify_file_downloaded_once(site_id, &file_id, &links);
                    return Ok(ResolvedUrl::Local(absolute));
                }

                // Metadata without bytes: drop the entry and re-download.
                debug!(site = %site_id, file = %file_id, "pool entry has no bytes on disk");
                if let Err(error) = self.remove_file_by_id(site_id, &file_id).await {
                    debug!(%error, file = %file_id, "failed to drop dangling pool entry");
                }
            }
        }

        match self
            .queue_file_if_needed(site_id, &file, revision, timemodified, options, 0, None)
            .await
        {
            // The ticket is dropped on purpose: resolution does not wait.
            Ok(_) => {}
            Err(error) => {
                debug!(%error, file = %file_id, "could not queue file during resolution");
            }
        }

        Ok(ResolvedUrl::Remote(file.url))
    }

    // ---- Direct download ------------------------------------------------

    /// Download a URL right now, reusing the pooled copy when it is fresh
    /// enough, and return the absolute path of the result.
    ///
    /// `ignore_stale` serves an outdated copy instead of re-downloading.
    /// `file_path` overrides the destination (relative to the data root);
    /// packages use this to lay files out in their own directories.
    pub async fn download_url(
        self: &Arc<Self>,
        site_id: &SiteId,
        file_url: &str,
        ignore_stale: bool,
        options: &FileOptions,
        file_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<PathBuf> {
        self.ensure_initialized()?;

        let file = self.fix_remote_file(remote_file_for_options(file_url, options))?;
        let timemodified = effective_timemodified(&file, options);
        let revision = self.effective_revision(&file, options);
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        let links: Vec<ComponentLink> = options.component_link().into_iter().collect();

        if let Some(path) = self
            .pooled_local_path(site_id, &file_id, revision, timemodified, ignore_stale, file_path)
            .await
        {
            self.add_links_quietly(site_id, &file_id, &links).await;
            self.notify_file_downloaded_once(site_id, &file_id, &links);
            return Ok(path);
        }

        self.notify_file_downloading(site_id, &file_id, &links);
        match self
            .download_for_pool(site_id, &file, revision, timemodified, file_path, progress)
            .await
        {
            Ok(entry) => {
                self.add_links_quietly(site_id, &file_id, &links).await;
                self.notify_file_downloaded(site_id, &file_id, &links);
                Ok(self.absolute_path(&entry.path))
            }
            Err(error) => {
                self.notify_file_download_failed(site_id, &file_id, &links);
                Err(error)
            }
        }
    }

    /// The pooled copy's absolute path, when it is usable as a cache hit:
    /// present, fresh enough under the staleness rules, and on disk.
    async fn pooled_local_path(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        revision: i64,
        timemodified: i64,
        ignore_stale: bool,
        file_path: Option<&str>,
    ) -> Option<PathBuf> {
        let entry = match self.stores.files.file(site_id, file_id).await {
            Ok(entry) => entry?,
            Err(error) => {
                warn!(%error, file = %file_id, "failed to read pool entry, downloading instead");
                return None;
            }
        };

        if entry.is_outdated(revision, timemodified)
            && self.network.connectivity().is_online()
            && !ignore_stale
        {
            return None;
        }

        let relative = match file_path {
            Some(path) => path,
            None => entry.path.as_str(),
        };
        let absolute = self.absolute_path(relative);
        self.fs.exists(&absolute).await.then_some(absolute)
    }

    // ---- The shared transfer path ---------------------------------------

    /// Fetch a file into the pool and record its entry.
    ///
    /// Concurrent calls for the same site and destination share one
    /// transfer: the first becomes the leader, the rest wait on its
    /// broadcast result.
    pub(crate) async fn download_for_pool(
        &self,
        site_id: &SiteId,
        file: &RemoteFile,
        revision: i64,
        timemodified: i64,
        file_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<FileEntry> {
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);
        let extension = match file_path {
            Some(_) => None,
            None => identity::guess_extension_from_url(&file.url),
        };
        let relative = match file_path {
            Some(path) => path.to_string(),
            None => paths::file_path(site_id, &file_id, extension.as_deref()),
        };
        let key = (site_id.clone(), transfer_id(&file.url, &relative));

        let mut receiver = {
            let mut transfers = lock_unpoisoned(&self.transfers);
            match transfers.get(&key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = watch::channel(None);
                    transfers.insert(key.clone(), sender);
                    None
                }
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            debug!(site = %site_id, file = %file_id, "joining in-flight transfer");
            return wait_for_transfer(receiver).await;
        }

        let result = self
            .transfer_into_pool(
                site_id,
                file,
                &file_id,
                extension.as_deref(),
                &relative,
                revision,
                timemodified,
                progress,
            )
            .await;

        let sender = lock_unpoisoned(&self.transfers).remove(&key);
        if let Some(sender) = sender {
            let _ = sender.send(Some(result.clone()));
        }

        result
    }

    /// Leader half of [`Filepool::download_for_pool`]: fetch the bytes,
    /// run the post-download hook and write the pool entry.
    #[allow(clippy::too_many_arguments)]
    async fn transfer_into_pool(
        &self,
        site_id: &SiteId,
        file: &RemoteFile,
        file_id: &FileId,
        extension: Option<&str>,
        relative: &str,
        revision: i64,
        timemodified: i64,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<FileEntry> {
        let absolute = self.absolute_path(relative);
        if let Some(parent) = absolute.parent() {
            self.fs.ensure_dir(parent).await?;
        }

        let fetched = self.fetcher.download(&file.url, &absolute, progress).await?;
        debug!(site = %site_id, file = %file_id, size = fetched.size, "fetched file into pool");

        let args = PluginFileArgs::from_url(&file.url);
        let strategy = self.strategies.strategy_for(args.as_ref());
        strategy.on_file_downloaded(&file.url, &absolute).await?;

        let entry = FileEntry {
            file_id: file_id.clone(),
            url: file.url.clone(),
            path: relative.to_string(),
            extension: extension.map(str::to_string),
            revision,
            timemodified,
            is_external_file: file.is_external_file,
            repository_type: file.repository_type.clone(),
            stale: false,
            download_time: now_millis(),
        };
        self.stores.files.upsert_file(site_id, &entry).await?;

        Ok(entry)
    }

    /// Whether a transfer to this destination is currently in flight.
    pub(crate) fn transfer_in_flight(&self, site_id: &SiteId, url: &str, relative: &str) -> bool {
        let key = (site_id.clone(), transfer_id(url, relative));
        lock_unpoisoned(&self.transfers).contains_key(&key)
    }

    // ---- Queueing -------------------------------------------------------

    /// Queue a download, merging into any entry already queued for the
    /// same file, and return a ticket that resolves when the download
    /// finishes. Priority runs 0–999, higher first.
    pub async fn add_to_queue_by_url(
        self: &Arc<Self>,
        site_id: &SiteId,
        file_url: &str,
        priority: i64,
        options: &FileOptions,
        file_path: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<QueueTicket> {
        self.ensure_initialized()?;

        let file = self.fix_remote_file(remote_file_for_options(file_url, options))?;
        let timemodified = effective_timemodified(&file, options);
        let revision = self.effective_revision(&file, options);
        let links: Vec<ComponentLink> = options.component_link().into_iter().collect();

        self.enqueue(site_id, &file, priority, revision, timemodified, file_path, links, progress)
            .await
    }

    /// Queue a download when the size policy allows it.
    ///
    /// With [`FileOptions::check_size`] unset the file is queued
    /// unconditionally. Otherwise the size — `size` if the caller knows
    /// it, a remote probe if not — decides: known sizes go through
    /// [`Filepool::should_download`], unknown sizes are queued only when
    /// [`FileOptions::download_unknown`] is set and the connection is
    /// unmetered. Returns `None` when the policy skipped the file.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_to_queue_if_needed(
        self: &Arc<Self>,
        site_id: &SiteId,
        file_url: &str,
        priority: i64,
        options: &FileOptions,
        size: Option<u64>,
        file_path: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<Option<QueueTicket>> {
        self.ensure_initialized()?;

        let mut file = self.fix_remote_file(remote_file_for_options(file_url, options))?;
        if size.is_some() {
            file.size = size;
        }
        let timemodified = effective_timemodified(&file, options);
        let revision = self.effective_revision(&file, options);

        self.queue_file_if_needed(site_id, &file, revision, timemodified, options, priority, file_path)
            .await
    }

    /// Size gate over [`Filepool::enqueue`], on an already fixed file.
    #[allow(clippy::too_many_arguments)]
    async fn queue_file_if_needed(
        self: &Arc<Self>,
        site_id: &SiteId,
        file: &RemoteFile,
        revision: i64,
        timemodified: i64,
        options: &FileOptions,
        priority: i64,
        file_path: Option<String>,
    ) -> FilepoolResult<Option<QueueTicket>> {
        if options.check_size {
            let size = match file.size.filter(|size| *size > 0) {
                Some(size) => Some(size),
                None => self.remote_file_size(&file.url).await?,
            };

            let allowed = match size {
                Some(size) => self.should_download(size),
                None => {
                    options.download_unknown && self.network.connectivity().is_unmetered()
                }
            };
            if !allowed {
                debug!(url = %file.url, ?size, "size policy skipped queueing");
                return Ok(None);
            }
        }

        let links: Vec<ComponentLink> = options.component_link().into_iter().collect();
        let ticket = self
            .enqueue(site_id, file, priority, revision, timemodified, file_path, links, None)
            .await?;
        Ok(Some(ticket))
    }

    /// Insert or merge a queue entry, register a completion ticket and
    /// wake the runner.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn enqueue(
        self: &Arc<Self>,
        site_id: &SiteId,
        file: &RemoteFile,
        priority: i64,
        revision: i64,
        timemodified: i64,
        file_path: Option<String>,
        links: Vec<ComponentLink>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<QueueTicket> {
        let file_id = identity::file_id_for_url(&self.strategies, &file.url);

        let incoming = QueueEntry {
            site_id: site_id.clone(),
            file_id: file_id.clone(),
            url: file.url.clone(),
            added: now_millis(),
            priority,
            revision,
            timemodified,
            path: file_path,
            is_external_file: file.is_external_file,
            repository_type: file.repository_type.clone(),
            links,
        };

        match self.stores.queue.get(site_id, &file_id).await? {
            Some(mut existing) => {
                debug!(site = %site_id, file = %file_id, "merging into queued entry");
                if existing.merge(&incoming) {
                    self.stores.queue.upsert(&existing).await?;
                }
            }
            None => {
                self.stores.queue.upsert(&incoming).await?;
                self.notify_file_downloading(site_id, &file_id, &incoming.links);
            }
        }

        let ticket = self.waiters.register(site_id, &file_id, progress);
        self.run_queue();
        Ok(ticket)
    }

    /// Whether the file currently has a queue entry.
    pub async fn has_file_in_queue(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> FilepoolResult<bool> {
        Ok(self.stores.queue.get(site_id, file_id).await?.is_some())
    }

    // ---- Size policy ----------------------------------------------------

    /// Size of a remote file, memoized for the engine's lifetime. `None`
    /// when the server does not report one.
    pub async fn remote_file_size(&self, file_url: &str) -> FilepoolResult<Option<u64>> {
        if let Some(size) = lock_unpoisoned(&self.size_cache).get(file_url).copied() {
            return Ok(Some(size));
        }

        if !self.network.connectivity().is_online() {
            return Err(FilepoolError::NetworkUnavailable);
        }

        let info = self.fetcher.remote_info(file_url).await?;
        match info.size.filter(|size| *size > 0) {
            Some(size) => {
                lock_unpoisoned(&self.size_cache).insert(file_url.to_string(), size);
                Ok(Some(size))
            }
            None => Ok(None),
        }
    }

    /// Whether a file of this size should be downloaded automatically on
    /// the current connection.
    pub fn should_download(&self, size: u64) -> bool {
        let connectivity = self.network.connectivity();
        size <= self.config.download_threshold
            || (connectivity.is_unmetered() && size <= self.config.wifi_download_threshold)
    }

    /// Whether a file should be fully downloaded before opening it.
    ///
    /// Small files always are, and an unknown size counts as small. Beyond
    /// the threshold, media the host can stream (audio and video, judged by
    /// the URL's extension) open straight from the source; everything else
    /// downloads first.
    pub fn should_download_before_open(&self, file_url: &str, size: Option<u64>) -> bool {
        if size.unwrap_or(0) <= self.config.download_threshold {
            return true;
        }
        !is_streamed_url(file_url)
    }

    // ---- The queue runner -----------------------------------------------

    /// Drain the queue until it is empty or blocked, then park until the
    /// next kick. Runs for the lifetime of the engine.
    pub(crate) async fn run_loop(&self) {
        loop {
            if !self.network.connectivity().is_online() {
                self.queue_kick.notified().await;
                continue;
            }

            let entry = match self.stores.queue.next().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.queue_kick.notified().await;
                    continue;
                }
                Err(error) => {
                    warn!(%error, "failed to read the next queue entry");
                    self.queue_kick.notified().await;
                    continue;
                }
            };

            if self.process_queue_entry(entry).await.is_err() {
                // Recoverable failure: the entry stays queued, the runner
                // parks until connectivity or a caller kicks it again.
                self.queue_kick.notified().await;
                continue;
            }

            let interval = self.config.queue_process_interval;
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
    }

    /// Process one queue entry.
    ///
    /// `Ok` means the entry is gone from the queue, whether it succeeded
    /// or was dropped as hopeless. `Err` means a recoverable failure: the
    /// entry stays queued and the runner must pause.
    async fn process_queue_entry(&self, entry: QueueEntry) -> FilepoolResult<()> {
        let site_id = entry.site_id.clone();
        let file_id = entry.file_id.clone();
        debug!(site = %site_id, file = %file_id, priority = entry.priority, "processing queue entry");

        // A file pooled fresh since the entry was added needs no transfer.
        // External files always re-download: their revision never changes.
        let pooled = match self.stores.files.file(&site_id, &file_id).await {
            Ok(pooled) => pooled,
            Err(error) => {
                warn!(%error, file = %file_id, "failed to read pool entry, downloading instead");
                None
            }
        };
        if let Some(pooled) = pooled {
            if !entry.is_external_file && !pooled.is_outdated(entry.revision, entry.timemodified) {
                self.add_links_quietly(&site_id, &file_id, &entry.links).await;
                self.finish_queue_entry(&entry, Ok(())).await;
                return Ok(());
            }
        }

        let file = remote_file_for_queue_entry(&entry);
        let progress = self.waiters.progress_for(&site_id, &file_id);

        match self
            .download_for_pool(
                &site_id,
                &file,
                entry.revision,
                entry.timemodified,
                entry.path.as_deref(),
                progress,
            )
            .await
        {
            Ok(_) => {
                self.add_links_quietly(&site_id, &file_id, &entry.links).await;
                self.notify_file_downloaded(&site_id, &file_id, &entry.links);
                self.finish_queue_entry(&entry, Ok(())).await;
                Ok(())
            }
            Err(error) if error.is_recoverable() => {
                warn!(%error, site = %site_id, file = %file_id, "download failed, keeping entry queued");
                self.waiters.settle(&site_id, &file_id, &Err(error.clone()));
                self.notify_file_download_failed(&site_id, &file_id, &entry.links);
                Err(error)
            }
            Err(error) => {
                warn!(%error, site = %site_id, file = %file_id, "download failed, dropping entry");
                self.notify_file_download_failed(&site_id, &file_id, &entry.links);
                self.finish_queue_entry(&entry, Err(error)).await;
                Ok(())
            }
        }
    }

    /// Remove a processed entry and settle whoever waited on it.
    async fn finish_queue_entry(&self, entry: &QueueEntry, outcome: FilepoolResult<()>) {
        if let Err(error) = self.stores.queue.remove(&entry.site_id, &entry.file_id).await {
            warn!(%error, file = %entry.file_id, "failed to remove processed queue entry");
        }
        self.waiters.settle(&entry.site_id, &entry.file_id, &outcome);
    }

    /// Revision for a request: the caller's when supplied, else extracted
    /// from the URL.
    fn effective_revision(&self, file: &RemoteFile, options: &FileOptions) -> i64 {
        options
            .revision
            .unwrap_or_else(|| identity::revision_from_url(&self.strategies, &file.url))
    }
}

/// Seed a file descriptor from a raw URL plus request options.
fn remote_file_for_options(file_url: &str, options: &FileOptions) -> RemoteFile {
    let mut file = RemoteFile::new(file_url).with_timemodified(options.timemodified);
    file.is_external_file = options.is_external_file;
    file.repository_type = options.repository_type.clone();
    file
}

fn remote_file_for_queue_entry(entry: &QueueEntry) -> RemoteFile {
    let mut file = RemoteFile::new(&entry.url).with_timemodified(entry.timemodified);
    file.is_external_file = entry.is_external_file;
    file.repository_type = entry.repository_type.clone();
    file
}

/// Modification time for a request: the file's when known, else the
/// caller's.
fn effective_timemodified(file: &RemoteFile, options: &FileOptions) -> i64 {
    if file.timemodified > 0 { file.timemodified } else { options.timemodified }
}

/// Key identifying one transfer: same URL to the same destination.
fn transfer_id(url: &str, relative: &str) -> String {
    short_hash(&format!("{url}###{relative}"))
}

/// Wait for the leader of an in-flight transfer to broadcast its result.
async fn wait_for_transfer(
    receiver: &mut watch::Receiver<Option<TransferResult>>,
) -> TransferResult {
    loop {
        if let Some(result) = receiver.borrow_and_update().as_ref() {
            return result.clone();
        }
        if receiver.changed().await.is_err() {
            return Err(FilepoolError::aborted("transfer abandoned before completion"));
        }
    }
}

/// Whether the URL looks like media the host streams instead of
/// pre-downloading.
fn is_streamed_url(file_url: &str) -> bool {
    let Some(extension) = identity::guess_extension_from_url(file_url) else {
        return false;
    };
    let Some(mime) = mime_guess::from_ext(&extension).first() else {
        return false;
    };
    let kind = mime.type_();
    kind == mime_guess::mime::VIDEO || kind == mime_guess::mime::AUDIO
}
