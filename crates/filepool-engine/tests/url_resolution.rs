//! Integration tests for URL resolution against the pool.
//!
//! Verifies that `resolve_url`:
//! - serves pooled copies locally and falls back to the source otherwise
//! - queues background refreshes for missing or stale files
//! - keeps serving stale content while offline
//! - backfills missing modification times on fresh hits
//! - recovers when pool metadata points at missing bytes

mod support;

use std::time::Duration;

use filepool_core::{Connectivity, DownloadStatus, FileOptions, FilepoolError};
use filepool_engine::ResolvedUrl;
use support::{pluginfile_url, site, test_pool, test_pool_uninitialized, wait_for_state, wait_until};

#[tokio::test]
async fn test_miss_points_at_source_and_downloads_in_background() {
    let pool = test_pool().await;
    let url = pluginfile_url("handout.pdf");

    let resolved = pool
        .engine
        .resolve_url(&site(), &url, &FileOptions::new())
        .await
        .unwrap();
    assert_eq!(resolved, ResolvedUrl::Remote(url.clone()));

    // The queue runner picks the file up on its own.
    assert!(wait_for_state(&pool, &url, DownloadStatus::Downloaded).await);
    assert_eq!(pool.fetcher.download_count(), 1);
}

#[tokio::test]
async fn test_hit_serves_local_path_without_touching_network() {
    let pool = test_pool().await;
    let url = pluginfile_url("notes.txt");

    let path = pool
        .engine
        .download_url(&site(), &url, false, &FileOptions::new(), None, None)
        .await
        .unwrap();
    assert_eq!(pool.fetcher.download_count(), 1);

    let resolved = pool
        .engine
        .resolve_url(&site(), &url, &FileOptions::new())
        .await
        .unwrap();
    assert_eq!(resolved, ResolvedUrl::Local(path.clone()));
    assert!(path.exists());
    assert_eq!(pool.fetcher.download_count(), 1);
    assert_eq!(pool.fetcher.probe_count(), 0);
}

#[tokio::test]
async fn test_offline_serves_stale_copy() {
    let pool = test_pool().await;
    let url = pluginfile_url("syllabus.txt");

    pool.engine
        .download_url(&site(), &url, false, &FileOptions::new(), None, None)
        .await
        .unwrap();
    pool.engine.invalidate_file_by_url(&site(), &url).await.unwrap();
    pool.network.set(Connectivity::Offline);

    let resolved = pool
        .engine
        .resolve_url(&site(), &url, &FileOptions::new())
        .await
        .unwrap();
    assert!(resolved.is_local());
    assert_eq!(pool.fetcher.download_count(), 1);
}

#[tokio::test]
async fn test_online_stale_falls_back_to_source_and_refreshes() {
    let pool = test_pool().await;
    let url = pluginfile_url("chapter.txt");

    pool.engine
        .download_url(&site(), &url, false, &FileOptions::new(), None, None)
        .await
        .unwrap();
    pool.engine.invalidate_file_by_url(&site(), &url).await.unwrap();

    let resolved = pool
        .engine
        .resolve_url(&site(), &url, &FileOptions::new())
        .await
        .unwrap();
    assert_eq!(resolved, ResolvedUrl::Remote(url.clone()));

    assert!(wait_for_state(&pool, &url, DownloadStatus::Downloaded).await);
    assert_eq!(pool.fetcher.download_count(), 2);
}

#[tokio::test]
async fn test_fresh_hit_backfills_missing_timemodified() {
    let pool = test_pool().await;
    let url = pluginfile_url("schedule.txt");

    // Pooled before anyone knew the modification time.
    pool.engine
        .download_url(&site(), &url, false, &FileOptions::new(), None, None)
        .await
        .unwrap();

    let resolved = pool
        .engine
        .resolve_url(&site(), &url, &FileOptions::new().with_timemodified(500))
        .await
        .unwrap();
    assert!(resolved.is_local());

    let file_id = pool.engine.file_id_by_url(&url);
    let entry = pool
        .stores
        .files
        .file(&site(), &file_id)
        .await
        .unwrap()
        .expect("entry still pooled");
    assert_eq!(entry.timemodified, 500);
}

#[tokio::test]
async fn test_entry_without_bytes_is_dropped_and_refetched() {
    let pool = test_pool().await;
    let url = pluginfile_url("orphan.txt");

    let path = pool
        .engine
        .download_url(&site(), &url, false, &FileOptions::new(), None, None)
        .await
        .unwrap();
    std::fs::remove_file(&path).unwrap();

    let resolved = pool
        .engine
        .resolve_url(&site(), &url, &FileOptions::new())
        .await
        .unwrap();
    assert_eq!(resolved, ResolvedUrl::Remote(url.clone()));

    let rewritten = path.clone();
    assert!(wait_until(Duration::from_secs(2), move || rewritten.exists()).await);
    assert_eq!(pool.fetcher.download_count(), 2);
}

#[tokio::test]
async fn test_identity_stable_across_url_variants() {
    let pool = test_pool().await;
    let downloaded = format!("{}?token=abc123&forcedownload=1", pluginfile_url("essay.txt"));

    pool.engine
        .download_url(&site(), &downloaded, false, &FileOptions::new(), None, None)
        .await
        .unwrap();

    // Same file through a bare URL: already pooled.
    let state = pool
        .engine
        .file_state_by_url(&site(), &pluginfile_url("essay.txt"), &FileOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(state, DownloadStatus::Downloaded);

    // Same file at a newer revision: same identity, flagged outdated.
    let newer = pluginfile_url("essay.txt").replace("/content/5/", "/content/9/");
    let state = pool
        .engine
        .file_state_by_url(&site(), &newer, &FileOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(state, DownloadStatus::Outdated);
}

#[tokio::test]
async fn test_uninitialized_engine_refuses_resolution() {
    let pool = test_pool_uninitialized().await;

    let result = pool
        .engine
        .resolve_url(&site(), &pluginfile_url("early.txt"), &FileOptions::new())
        .await;
    assert!(matches!(result, Err(FilepoolError::Uninitialized)));
}
