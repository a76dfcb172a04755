//! Shared fixtures for the engine integration tests.
//!
//! Wires a real engine to an in-memory database, a throw-away data root
//! and scripted fetcher/network/emitter ports, so tests exercise the full
//! stack below the HTTP client.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use filepool_core::{
    Connectivity, DownloadProgress, FetchedFile, FileFetcherPort, FilepoolError, FilepoolEvent,
    FilepoolEventEmitterPort, FilepoolResult, NetworkStatusPort, ProgressCallback, RemoteFileInfo,
    SiteId, Stores, StrategyRegistry, TokioFileSystem,
};
use filepool_db::{StoreFactory, setup_test_database};
use filepool_engine::{Filepool, FilepoolConfig};
use tempfile::TempDir;

/// An engine wired for tests, with handles to everything worth asserting
/// on.
pub struct TestPool {
    pub engine: Arc<Filepool>,
    pub fetcher: Arc<StubFetcher>,
    pub network: Arc<StubNetwork>,
    pub emitter: Arc<RecordingEmitter>,
    /// Direct store access for assertions the public API does not cover.
    pub stores: Stores,
    /// Holding the guard keeps the data root alive for the test.
    pub data_root: TempDir,
}

/// Build an initialized engine on an unmetered connection.
pub async fn test_pool() -> TestPool {
    test_pool_with(Connectivity::Unmetered).await
}

/// Build an initialized engine with the given starting connectivity.
pub async fn test_pool_with(connectivity: Connectivity) -> TestPool {
    let pool = build_pool(connectivity, StrategyRegistry::new()).await;
    pool.engine.initialize();
    pool
}

/// Build an engine without calling `initialize()`.
#[allow(dead_code)]
pub async fn test_pool_uninitialized() -> TestPool {
    build_pool(Connectivity::Unmetered, StrategyRegistry::new()).await
}

/// Build an initialized engine with custom content strategies.
#[allow(dead_code)]
pub async fn test_pool_with_strategies(strategies: StrategyRegistry) -> TestPool {
    let pool = build_pool(Connectivity::Unmetered, strategies).await;
    pool.engine.initialize();
    pool
}

async fn build_pool(connectivity: Connectivity, strategies: StrategyRegistry) -> TestPool {
    let db = setup_test_database().await.expect("in-memory database");
    let stores = StoreFactory::build_stores(&db);

    let data_root = TempDir::new().expect("temp data root");
    let fetcher = Arc::new(StubFetcher::default());
    let network = Arc::new(StubNetwork::new(connectivity));
    let emitter = Arc::new(RecordingEmitter::default());

    let engine = Arc::new(Filepool::new(
        FilepoolConfig::new(data_root.path()),
        stores.clone(),
        Arc::clone(&fetcher) as Arc<dyn FileFetcherPort>,
        Arc::new(TokioFileSystem),
        Arc::clone(&network) as Arc<dyn NetworkStatusPort>,
        Arc::clone(&emitter) as Arc<dyn FilepoolEventEmitterPort>,
        strategies,
    ));

    TestPool {
        engine,
        fetcher,
        network,
        emitter,
        stores,
        data_root,
    }
}

/// The site most tests operate on.
pub fn site() -> SiteId {
    SiteId::new("school")
}

/// A content-area pluginfile URL, the bread and butter of the pool.
#[allow(dead_code)]
pub fn pluginfile_url(name: &str) -> String {
    format!("https://school.example/webservice/pluginfile.php/21/mod_page/content/5/{name}")
}

/// Scripted fetcher.
///
/// Serves configurable bodies per URL, optionally failing first, and
/// records every probe and download so tests can assert on traffic.
#[derive(Default)]
pub struct StubFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    sizes: Mutex<HashMap<String, Option<u64>>>,
    failures: Mutex<HashMap<String, Vec<FilepoolError>>>,
    downloads: Mutex<Vec<String>>,
    probes: Mutex<Vec<String>>,
    transfer_delay: Mutex<Duration>,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl StubFetcher {
    /// Script the bytes served for a URL.
    #[allow(dead_code)]
    pub fn serve(&self, url: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    /// Script the size reported by `remote_info` for a URL.
    #[allow(dead_code)]
    pub fn report_size(&self, url: &str, size: Option<u64>) {
        self.sizes.lock().unwrap().insert(url.to_string(), size);
    }

    /// Fail the next download of a URL with this error; repeated calls
    /// stack, failing one download each.
    #[allow(dead_code)]
    pub fn fail_next(&self, url: &str, error: FilepoolError) {
        self.failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(error);
    }

    /// Hold every transfer open for this long, making overlap observable.
    #[allow(dead_code)]
    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = delay;
    }

    /// URLs downloaded so far, in order.
    #[allow(dead_code)]
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }

    /// Most transfers ever observed in flight at once.
    #[allow(dead_code)]
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_failure(&self, url: &str) -> Option<FilepoolError> {
        let mut failures = self.failures.lock().unwrap();
        let queued = failures.get_mut(url)?;
        if queued.is_empty() {
            None
        } else {
            Some(queued.remove(0))
        }
    }

    fn body_for(&self, url: &str) -> Vec<u8> {
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| b"pooled bytes".to_vec())
    }
}

#[async_trait]
impl FileFetcherPort for StubFetcher {
    async fn remote_info(&self, url: &str) -> FilepoolResult<RemoteFileInfo> {
        self.probes.lock().unwrap().push(url.to_string());
        let size = self
            .sizes
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(Some(1024));
        Ok(RemoteFileInfo {
            size,
            mime_type: None,
        })
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<FetchedFile> {
        self.downloads.lock().unwrap().push(url.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.transfer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self.write_body(url, destination, progress).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl StubFetcher {
    async fn write_body(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> FilepoolResult<FetchedFile> {
        if let Some(error) = self.next_failure(url) {
            return Err(error);
        }

        let body = self.body_for(url);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| FilepoolError::from_io_error(&error))?;
        }
        tokio::fs::write(destination, &body)
            .await
            .map_err(|error| FilepoolError::from_io_error(&error))?;

        let size = body.len() as u64;
        if let Some(progress) = progress {
            progress(DownloadProgress::new(size, size));
        }

        Ok(FetchedFile {
            path: destination.to_path_buf(),
            size,
            mime_type: None,
        })
    }
}

/// Network status a test can flip at will.
pub struct StubNetwork {
    connectivity: Mutex<Connectivity>,
}

impl StubNetwork {
    pub fn new(connectivity: Connectivity) -> Self {
        Self {
            connectivity: Mutex::new(connectivity),
        }
    }

    #[allow(dead_code)]
    pub fn set(&self, connectivity: Connectivity) {
        *self.connectivity.lock().unwrap() = connectivity;
    }
}

impl NetworkStatusPort for StubNetwork {
    fn connectivity(&self) -> Connectivity {
        *self.connectivity.lock().unwrap()
    }
}

/// Emitter that keeps every event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<FilepoolEvent>>>,
}

impl RecordingEmitter {
    #[allow(dead_code)]
    pub fn events(&self) -> Vec<FilepoolEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded events matching a predicate.
    #[allow(dead_code)]
    pub fn count_matching(&self, predicate: impl Fn(&FilepoolEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl FilepoolEventEmitterPort for RecordingEmitter {
    fn emit(&self, event: FilepoolEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn clone_box(&self) -> Box<dyn FilepoolEventEmitterPort> {
        Box::new(self.clone())
    }
}

/// Poll until the condition holds or the timeout elapses. The queue
/// runner works in the background, so outcomes arrive asynchronously.
#[allow(dead_code)]
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Poll until a URL reaches the expected download state.
#[allow(dead_code)]
pub async fn wait_for_state(
    pool: &TestPool,
    url: &str,
    expected: filepool_core::DownloadStatus,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let state = pool
            .engine
            .file_state_by_url(&site(), url, &filepool_core::FileOptions::new(), None)
            .await
            .expect("state query");
        if state == expected {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
