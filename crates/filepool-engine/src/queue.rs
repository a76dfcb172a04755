//! Completion tickets for queued downloads.
//!
//! Queueing a file hands back a [`QueueTicket`]; the queue runner settles
//! every ticket of a file when its entry completes or is dropped. One file
//! can hold several tickets at once (a package prefetch and a direct
//! caller, say) and they all resolve with the same outcome.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use filepool_core::{FileId, FilepoolError, FilepoolResult, ProgressCallback, SiteId};

/// Resolves when the queue finishes (or gives up on) one queued file.
#[derive(Debug)]
pub struct QueueTicket {
    receiver: oneshot::Receiver<FilepoolResult<()>>,
}

impl QueueTicket {
    /// Wait for the queued download to settle.
    ///
    /// Errors with [`FilepoolError::Aborted`] if the engine is dropped
    /// before the entry was processed.
    pub async fn wait(self) -> FilepoolResult<()> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(FilepoolError::aborted("queue abandoned before completion")),
        }
    }
}

/// Registry of pending tickets, keyed by queued file.
///
/// Slots are created on registration and removed wholesale on settle, so
/// a settled file leaves nothing behind.
#[derive(Default)]
pub(crate) struct QueueWaiters {
    slots: Mutex<HashMap<(SiteId, FileId), WaiterSlot>>,
}

#[derive(Default)]
struct WaiterSlot {
    senders: Vec<oneshot::Sender<FilepoolResult<()>>>,
    progress: Option<ProgressCallback>,
}

impl QueueWaiters {
    /// Add a ticket for a file, optionally attaching a progress callback.
    /// The queue reports progress to one callback per file; the last
    /// caller to supply one wins.
    pub(crate) fn register(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
        progress: Option<ProgressCallback>,
    ) -> QueueTicket {
        let (sender, receiver) = oneshot::channel();

        let mut slots = self.lock();
        let slot = slots.entry((site_id.clone(), file_id.clone())).or_default();
        slot.senders.push(sender);
        if progress.is_some() {
            slot.progress = progress;
        }

        QueueTicket { receiver }
    }

    /// The progress callback attached to a file, if any.
    pub(crate) fn progress_for(
        &self,
        site_id: &SiteId,
        file_id: &FileId,
    ) -> Option<ProgressCallback> {
        self.lock()
            .get(&(site_id.clone(), file_id.clone()))
            .and_then(|slot| slot.progress.clone())
    }

    /// Resolve and evict every ticket of a file.
    pub(crate) fn settle(&self, site_id: &SiteId, file_id: &FileId, result: &FilepoolResult<()>) {
        let slot = self.lock().remove(&(site_id.clone(), file_id.clone()));

        if let Some(slot) = slot {
            for sender in slot.senders {
                // The ticket may have been dropped; nobody to tell then.
                let _ = sender.send(result.clone());
            }
        }
    }

    /// Number of files with pending tickets.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(SiteId, FileId), WaiterSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
