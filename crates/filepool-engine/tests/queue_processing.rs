//! Integration tests for the persistent download queue.
//!
//! Verifies that the queue runner:
//! - downloads strictly one entry at a time
//! - honours priority ordering
//! - merges re-added requests and settles every caller
//! - keeps recoverable failures queued and drops hopeless ones
//! - pauses while offline and resumes on re-kick
//! - forwards registered progress callbacks

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use filepool_core::{
    Connectivity, DownloadProgress, FileOptions, FilepoolError, ProgressCallback,
};
use support::{pluginfile_url, site, test_pool, test_pool_with, wait_until};

#[tokio::test]
async fn test_queue_downloads_one_at_a_time() {
    let pool = test_pool_with(Connectivity::Offline).await;
    pool.fetcher.set_transfer_delay(Duration::from_millis(30));

    let mut tickets = Vec::new();
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        let ticket = pool
            .engine
            .add_to_queue_by_url(&site(), &pluginfile_url(name), 0, &FileOptions::new(), None, None)
            .await
            .unwrap();
        tickets.push(ticket);
    }
    assert_eq!(pool.fetcher.download_count(), 0);

    pool.network.set(Connectivity::Unmetered);
    pool.engine.run_queue();

    for ticket in tickets {
        ticket.wait().await.unwrap();
    }
    assert_eq!(pool.fetcher.download_count(), 4);
    assert_eq!(pool.fetcher.max_in_flight(), 1);
}

#[tokio::test]
async fn test_higher_priority_runs_first() {
    let pool = test_pool_with(Connectivity::Offline).await;

    let low = pool
        .engine
        .add_to_queue_by_url(&site(), &pluginfile_url("low.txt"), 1, &FileOptions::new(), None, None)
        .await
        .unwrap();
    let high = pool
        .engine
        .add_to_queue_by_url(&site(), &pluginfile_url("high.txt"), 9, &FileOptions::new(), None, None)
        .await
        .unwrap();

    pool.network.set(Connectivity::Unmetered);
    pool.engine.run_queue();
    high.wait().await.unwrap();
    low.wait().await.unwrap();

    let downloads = pool.fetcher.downloads();
    assert!(downloads[0].contains("high.txt"));
    assert!(downloads[1].contains("low.txt"));
}

#[tokio::test]
async fn test_re_add_merges_and_settles_every_caller() {
    let pool = test_pool_with(Connectivity::Offline).await;
    let url = pluginfile_url("shared.txt");

    let first = pool
        .engine
        .add_to_queue_by_url(&site(), &url, 5, &FileOptions::new(), None, None)
        .await
        .unwrap();
    let second = pool
        .engine
        .add_to_queue_by_url(&site(), &url, 9, &FileOptions::new(), None, None)
        .await
        .unwrap();

    // One entry, carrying the higher priority.
    let file_id = pool.engine.file_id_by_url(&url);
    let entry = pool
        .stores
        .queue
        .get(&site(), &file_id)
        .await
        .unwrap()
        .expect("queued entry");
    assert_eq!(entry.priority, 9);

    pool.network.set(Connectivity::Unmetered);
    pool.engine.run_queue();

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert_eq!(pool.fetcher.download_count(), 1);
}

#[tokio::test]
async fn test_recoverable_failure_keeps_entry_for_retry() {
    let pool = test_pool().await;
    let url = pluginfile_url("flaky.txt");
    pool.fetcher
        .fail_next(&url, FilepoolError::aborted("connection dropped mid-transfer"));

    let ticket = pool
        .engine
        .add_to_queue_by_url(&site(), &url, 0, &FileOptions::new(), None, None)
        .await
        .unwrap();
    assert!(matches!(
        ticket.wait().await,
        Err(FilepoolError::Aborted { .. })
    ));

    // The entry survived the failure and a re-kick finishes the job.
    let file_id = pool.engine.file_id_by_url(&url);
    assert!(pool.stores.queue.get(&site(), &file_id).await.unwrap().is_some());

    pool.engine.run_queue();
    let fetcher = pool.fetcher.clone();
    assert!(wait_until(Duration::from_secs(2), move || fetcher.download_count() == 2).await);

    // Entry removal follows the transfer; poll until it lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if pool.stores.queue.get(&site(), &file_id).await.unwrap().is_none() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "queue entry never removed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_permanent_failure_drops_entry() {
    let pool = test_pool().await;
    let url = pluginfile_url("gone.txt");
    pool.fetcher
        .fail_next(&url, FilepoolError::not_found("removed on the server"));

    let ticket = pool
        .engine
        .add_to_queue_by_url(&site(), &url, 0, &FileOptions::new(), None, None)
        .await
        .unwrap();
    assert!(matches!(
        ticket.wait().await,
        Err(FilepoolError::NotFound { .. })
    ));

    let file_id = pool.engine.file_id_by_url(&url);
    assert!(pool.stores.queue.get(&site(), &file_id).await.unwrap().is_none());

    // Nothing left to retry.
    pool.engine.run_queue();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.fetcher.download_count(), 1);
}

#[tokio::test]
async fn test_queue_pauses_offline_and_resumes() {
    let pool = test_pool_with(Connectivity::Offline).await;
    let url = pluginfile_url("patient.txt");

    let ticket = pool
        .engine
        .add_to_queue_by_url(&site(), &url, 0, &FileOptions::new(), None, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.fetcher.download_count(), 0);
    let file_id = pool.engine.file_id_by_url(&url);
    assert!(pool.stores.queue.get(&site(), &file_id).await.unwrap().is_some());

    pool.network.set(Connectivity::Unmetered);
    pool.engine.run_queue();
    ticket.wait().await.unwrap();
    assert_eq!(pool.fetcher.download_count(), 1);
}

#[tokio::test]
async fn test_registered_progress_reaches_caller() {
    let pool = test_pool().await;
    let url = pluginfile_url("tracked.txt");
    pool.fetcher.serve(&url, &[7u8; 64]);

    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback =
        Arc::new(move |update: DownloadProgress| sink.lock().unwrap().push(update.loaded));

    let ticket = pool
        .engine
        .add_to_queue_by_url(&site(), &url, 0, &FileOptions::new(), None, Some(callback))
        .await
        .unwrap();
    ticket.wait().await.unwrap();

    assert_eq!(seen.lock().unwrap().as_slice(), &[64]);
}
