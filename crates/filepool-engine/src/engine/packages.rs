//! Package tracking: bundles of files owned by one component instance.
//!
//! A package has a single status row driving "download course" style UI.
//! Downloads move it to `downloading`, then to `downloaded` on full
//! success; any failure rolls it back to whatever it was before, so a
//! package is never left claiming content it only half has.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, warn};

use filepool_core::{
    DownloadProgress, DownloadStatus, FileOptions, FilepoolError, FilepoolEvent, FilepoolResult,
    PackageEntry, PackageId, ProgressCallback, RemoteFile, SiteId, normalize_component_id,
    now_millis, now_seconds, paths,
};

use crate::identity;

use super::{Filepool, lock_unpoisoned};

impl Filepool {
    // ---- Status rows ----------------------------------------------------

    /// Record a package status transition.
    ///
    /// Entering [`DownloadStatus::Downloading`] stamps a fresh download
    /// time and keeps the old one for rollback; other statuses leave both
    /// untouched. `extra` replaces the stored value only when supplied.
    /// Storing the status a package already has is a no-op: no write, no
    /// event.
    pub async fn store_package_status(
        &self,
        site_id: &SiteId,
        status: DownloadStatus,
        component: &str,
        component_id: Option<&str>,
        extra: Option<&str>,
    ) -> FilepoolResult<()> {
        self.ensure_initialized()?;
        let package_id = PackageId::for_component(component, component_id);
        debug!(site = %site_id, package = %package_id, ?status, "storing package status");

        let existing = self.stores.packages.get(site_id, &package_id).await?;
        if existing.as_ref().is_some_and(|entry| entry.status == status) {
            return Ok(());
        }

        let (download_time, previous_download_time) = match (&existing, status) {
            (Some(entry), DownloadStatus::Downloading) => (now_seconds(), entry.download_time),
            (Some(entry), _) => (entry.download_time, entry.previous_download_time),
            (None, DownloadStatus::Downloading) => (now_seconds(), 0),
            (None, _) => (0, 0),
        };

        let normalized = normalize_component_id(component_id);
        let entry = PackageEntry {
            id: package_id,
            component: component.to_string(),
            component_id: normalized.clone(),
            status,
            previous: existing.as_ref().map(|entry| entry.status),
            updated: now_millis(),
            download_time,
            previous_download_time,
            extra: match extra {
                Some(extra) => Some(extra.to_string()),
                None => existing.and_then(|entry| entry.extra),
            },
        };
        self.stores.packages.upsert(site_id, &entry).await?;

        self.emitter.emit(FilepoolEvent::package_status(
            site_id.clone(),
            component,
            normalized,
            status,
        ));
        Ok(())
    }

    /// Roll a package back to its pre-transition status.
    ///
    /// Leaving [`DownloadStatus::Downloading`] also restores the previous
    /// download time. Returns the restored status; a package never stored
    /// is an error.
    pub async fn set_package_previous_status(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<DownloadStatus> {
        self.ensure_initialized()?;
        let package_id = PackageId::for_component(component, component_id);

        let Some(mut entry) = self.stores.packages.get(site_id, &package_id).await? else {
            return Err(FilepoolError::not_found(format!("package {package_id}")));
        };

        if entry.status == DownloadStatus::Downloading {
            entry.download_time = entry.previous_download_time;
        }
        let restored = entry.previous.unwrap_or(DownloadStatus::NotDownloaded);
        entry.status = restored;
        entry.updated = now_millis();
        debug!(site = %site_id, package = %entry.id, ?restored, "restored previous package status");

        self.stores.packages.upsert(site_id, &entry).await?;
        self.emitter.emit(FilepoolEvent::package_status(
            site_id.clone(),
            component,
            entry.component_id,
            restored,
        ));
        Ok(restored)
    }

    /// Stamp a fresh download time without touching the status, used when
    /// content is refreshed in place.
    pub async fn update_package_download_time(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<()> {
        self.ensure_initialized()?;
        let package_id = PackageId::for_component(component, component_id);

        if let Some(mut entry) = self.stores.packages.get(site_id, &package_id).await? {
            entry.download_time = now_seconds();
            self.stores.packages.upsert(site_id, &entry).await?;
        }
        Ok(())
    }

    /// The stored row for a package, when there is one.
    pub async fn package_data(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<Option<PackageEntry>> {
        let package_id = PackageId::for_component(component, component_id);
        Ok(self.stores.packages.get(site_id, &package_id).await?)
    }

    /// Current package status; a package never stored is
    /// [`DownloadStatus::NotDownloaded`].
    pub async fn package_status(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<DownloadStatus> {
        let data = self.package_data(site_id, component, component_id).await?;
        Ok(data.map_or(DownloadStatus::NotDownloaded, |entry| entry.status))
    }

    /// Status a rollback would restore; defaults like
    /// [`Filepool::package_status`].
    pub async fn package_previous_status(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<DownloadStatus> {
        let data = self.package_data(site_id, component, component_id).await?;
        Ok(data
            .and_then(|entry| entry.previous)
            .unwrap_or(DownloadStatus::NotDownloaded))
    }

    /// The opaque `extra` payload stored with the package.
    pub async fn package_extra(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<Option<String>> {
        let data = self.package_data(site_id, component, component_id).await?;
        Ok(data.and_then(|entry| entry.extra))
    }

    /// Drop every package row of a site, notifying each component that
    /// its package is back to not downloaded.
    pub async fn clear_all_packages_status(&self, site_id: &SiteId) -> FilepoolResult<()> {
        self.ensure_initialized()?;

        let entries = self.stores.packages.all(site_id).await?;
        self.stores.packages.clear(site_id).await?;

        for entry in entries {
            self.emitter.emit(FilepoolEvent::package_status(
                site_id.clone(),
                entry.component,
                entry.component_id,
                DownloadStatus::NotDownloaded,
            ));
        }
        Ok(())
    }

    // ---- Package downloads ----------------------------------------------

    /// Download or prefetch a list of files as one package.
    ///
    /// Concurrent calls for the same package share one run. The package
    /// moves to `downloading` up front; full success stores `downloaded`
    /// together with `extra`, any failure rolls the status back and
    /// propagates. With `prefetch` the files go through the queue,
    /// otherwise they download right away. `dir_path` names a directory
    /// inside the site's pool folder (see
    /// [`Filepool::package_dir_name_by_url`]) where the files keep their
    /// server-reported names and folders.
    #[allow(clippy::too_many_arguments)]
    pub async fn download_or_prefetch_package(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        prefetch: bool,
        component: &str,
        component_id: Option<&str>,
        extra: Option<&str>,
        dir_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<()> {
        self.ensure_initialized()?;
        let package_id = PackageId::for_component(component, component_id);
        let key = (site_id.clone(), package_id.clone());

        let mut receiver = {
            let mut downloads = lock_unpoisoned(&self.package_downloads);
            match downloads.get(&key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = watch::channel(None);
                    downloads.insert(key.clone(), sender);
                    None
                }
            }
        };
        if let Some(receiver) = receiver.as_mut() {
            debug!(site = %site_id, package = %package_id, "joining in-flight package download");
            return wait_for_package(receiver).await;
        }

        let result = self
            .run_package_download(
                site_id,
                files,
                prefetch,
                component,
                component_id,
                extra,
                dir_path,
                progress,
            )
            .await;

        let sender = lock_unpoisoned(&self.package_downloads).remove(&key);
        if let Some(sender) = sender {
            let _ = sender.send(Some(result.clone()));
        }

        result
    }

    /// Download a package right now.
    #[allow(clippy::too_many_arguments)]
    pub async fn download_package(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        component: &str,
        component_id: Option<&str>,
        extra: Option<&str>,
        dir_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<()> {
        self.download_or_prefetch_package(
            site_id,
            files,
            false,
            component,
            component_id,
            extra,
            dir_path,
            progress,
        )
        .await
    }

    /// Queue a package for download in the background.
    pub async fn prefetch_package(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        component: &str,
        component_id: Option<&str>,
        extra: Option<&str>,
        dir_path: Option<&str>,
    ) -> FilepoolResult<()> {
        self.download_or_prefetch_package(
            site_id,
            files,
            true,
            component,
            component_id,
            extra,
            dir_path,
            None,
        )
        .await
    }

    /// Download or prefetch a list of files linked to a component without
    /// tracking them as a package.
    #[allow(clippy::too_many_arguments)]
    pub async fn download_or_prefetch_files(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        prefetch: bool,
        component: &str,
        component_id: Option<&str>,
        dir_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<()> {
        self.ensure_initialized()?;
        self.transfer_package_files(
            site_id,
            files,
            prefetch,
            component,
            component_id,
            dir_path,
            progress,
        )
        .await
    }

    /// Queue a list of files and wait until all of them are downloaded.
    pub async fn add_files_to_queue(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        component: &str,
        component_id: Option<&str>,
    ) -> FilepoolResult<()> {
        self.download_or_prefetch_files(site_id, files, true, component, component_id, None, None)
            .await
    }

    /// Wait for an in-flight download of this package, when there is one.
    ///
    /// `None` means nothing is in flight; `Some` carries the outcome the
    /// download finished with.
    pub async fn wait_for_package_download(
        &self,
        site_id: &SiteId,
        component: &str,
        component_id: Option<&str>,
    ) -> Option<FilepoolResult<()>> {
        let package_id = PackageId::for_component(component, component_id);
        let key = (site_id.clone(), package_id);

        let mut receiver = {
            let downloads = lock_unpoisoned(&self.package_downloads);
            downloads.get(&key).map(watch::Sender::subscribe)
        }?;
        Some(wait_for_package(&mut receiver).await)
    }

    /// Status transition wrapper around the actual transfers.
    #[allow(clippy::too_many_arguments)]
    async fn run_package_download(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        prefetch: bool,
        component: &str,
        component_id: Option<&str>,
        extra: Option<&str>,
        dir_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<()> {
        self.store_package_status(
            site_id,
            DownloadStatus::Downloading,
            component,
            component_id,
            None,
        )
        .await?;

        let transferred = self
            .transfer_package_files(
                site_id,
                files,
                prefetch,
                component,
                component_id,
                dir_path,
                progress,
            )
            .await;

        // Storing the final status is part of the attempt: if it cannot be
        // recorded, the package rolls back like any other failure.
        let result = match transferred {
            Ok(()) => {
                self.store_package_status(
                    site_id,
                    DownloadStatus::Downloaded,
                    component,
                    component_id,
                    extra,
                )
                .await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                if let Err(rollback_error) = self
                    .set_package_previous_status(site_id, component, component_id)
                    .await
                {
                    warn!(%rollback_error, component, "failed to roll back package status");
                }
                Err(error)
            }
        }
    }

    /// Move every file of a package, queueing or downloading each, and
    /// aggregate per-file progress into whole-package byte counts.
    ///
    /// Every file is attempted; the first failure wins once all have
    /// settled.
    async fn transfer_package_files(
        self: &Arc<Self>,
        site_id: &SiteId,
        files: &[RemoteFile],
        prefetch: bool,
        component: &str,
        component_id: Option<&str>,
        dir_path: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<()> {
        let package_loaded = Arc::new(AtomicU64::new(0));
        let mut tickets = Vec::new();
        let mut failure: Option<FilepoolError> = None;

        for file in files {
            let mut options = FileOptions::new()
                .with_component(component, component_id)
                .with_timemodified(file.timemodified);
            options.is_external_file = file.is_external_file;
            options.repository_type = file.repository_type.clone();

            let path = dir_path.map(|dir| package_relative_path(site_id, dir, file));
            let file_progress = file_progress_aggregator(progress.as_ref(), &package_loaded);

            if prefetch {
                match self
                    .add_to_queue_by_url(site_id, &file.url, 0, &options, path, file_progress)
                    .await
                {
                    Ok(ticket) => tickets.push(ticket),
                    Err(error) => {
                        if failure.is_none() {
                            failure = Some(error);
                        }
                    }
                }
            } else if let Err(error) = self
                .download_url(site_id, &file.url, false, &options, path.as_deref(), file_progress)
                .await
            {
                if failure.is_none() {
                    failure = Some(error);
                }
            }
        }

        for ticket in tickets {
            if let Err(error) = ticket.wait().await {
                if failure.is_none() {
                    failure = Some(error);
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ---- Package directories --------------------------------------------

    /// Directory name a URL's package content lives under; stable across
    /// revisions and access-token changes of the same URL.
    pub fn package_dir_name_by_url(&self, file_url: &str) -> FilepoolResult<String> {
        let file = self.fix_remote_file(RemoteFile::new(file_url))?;
        Ok(identity::package_dir_name_for_url(&self.strategies, &file.url))
    }

    /// Absolute path of the package directory for a URL.
    pub fn package_dir_path_by_url(
        &self,
        site_id: &SiteId,
        file_url: &str,
    ) -> FilepoolResult<PathBuf> {
        let dir_name = self.package_dir_name_by_url(file_url)?;
        Ok(self.absolute_path(&paths::package_dir_path(site_id, &dir_name)))
    }
}

/// Destination of one package file inside its package directory, from the
/// server-reported name and folder. Relative to the data root, like every
/// persisted pool path.
fn package_relative_path(site_id: &SiteId, dir_name: &str, file: &RemoteFile) -> String {
    let mut name = file.file_name.clone().unwrap_or_default();
    if let Some(folder) = file.file_path.as_deref() {
        if folder != "/" {
            name = format!("{}{name}", folder.trim_start_matches('/'));
        }
    }
    let dir = paths::package_dir_path(site_id, dir_name.trim_end_matches('/'));
    format!("{dir}/{name}")
}

/// Per-file progress callback adding this file's newly loaded bytes to the
/// package total.
fn file_progress_aggregator(
    progress: Option<&ProgressCallback>,
    package_loaded: &Arc<AtomicU64>,
) -> Option<ProgressCallback> {
    let outer = Arc::clone(progress?);
    let package_loaded = Arc::clone(package_loaded);
    let file_loaded = AtomicU64::new(0);

    Some(Arc::new(move |update: DownloadProgress| {
        let previous = file_loaded.swap(update.loaded, Ordering::SeqCst);
        let delta = update.loaded.saturating_sub(previous);
        let loaded = package_loaded.fetch_add(delta, Ordering::SeqCst) + delta;
        outer(DownloadProgress::indeterminate(loaded));
    }))
}

/// Wait for the holder of an in-flight package download to broadcast its
/// outcome.
async fn wait_for_package(
    receiver: &mut watch::Receiver<Option<FilepoolResult<()>>>,
) -> FilepoolResult<()> {
    loop {
        if let Some(result) = receiver.borrow_and_update().as_ref() {
            return result.clone();
        }
        if receiver.changed().await.is_err() {
            return Err(FilepoolError::aborted("package download abandoned before completion"));
        }
    }
}
