//! The public API: a single owning handle returned from `init` and passed
//! explicitly by the caller, rather than process-wide global state. A thin
//! process-global shim is deliberately not offered -- nothing in this
//! crate's embedding story needs one.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::error::CacheError;
use crate::etag_index::EtagIndex;
use crate::prelude::*;
use crate::queue::{LoadQueue, WorkQueue};
use crate::types::{LoadItem, WorkItem};
use crate::worker::{DeliveryCallback, Worker};

/// A point-in-time snapshot of queue depths and in-flight transfers, useful
/// for diagnostics and for driving concurrency-bound assertions in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub transfers_in_flight: usize,
    pub load_queue_depth: usize,
    pub work_queue_depth: usize,
}

/// Owning handle for one cache instance: one `init` call, one cache
/// directory, one callback, two long-lived threads.
pub struct ImageCache {
    load_queue: Arc<LoadQueue>,
    work_queue: Arc<WorkQueue>,
    etag_index: Arc<Mutex<EtagIndex>>,
    blob_store: Arc<BlobStore>,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    worker_handle: Option<JoinHandle<()>>,
    fetcher_handle: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl ImageCache {
    /// Creates the cache directory, starts the worker (which in turn starts
    /// the fetcher once its startup load-and-evict has completed), and
    /// returns the handle. Process-wide HTTP/TLS initialization is handled
    /// lazily by `transfer.rs`'s `Lazy<Agent>`, so there's no separate
    /// explicit step for it here.
    pub fn init<F>(config: Config, callback: F) -> Result<ImageCache, CacheError>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        config.validate()?;
        let blob_store = BlobStore::new(&config.cache_dir).map_err(|source| {
            CacheError::CacheDirCreate {
                path: config.cache_dir.clone(),
                source,
            }
        })?;
        let blob_store = Arc::new(blob_store);
        let etag_index = Arc::new(Mutex::new(EtagIndex::new(&config.cache_dir)));
        let load_queue = Arc::new(LoadQueue::new());
        let work_queue = Arc::new(WorkQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let callback: Arc<DeliveryCallback> = Arc::new(callback);

        let worker = Worker::new(
            config,
            load_queue.clone(),
            work_queue.clone(),
            etag_index.clone(),
            blob_store.clone(),
            running.clone(),
            in_flight.clone(),
            callback,
        );
        let (worker_handle, fetcher_handle) = worker.start();

        Ok(ImageCache {
            load_queue,
            work_queue,
            etag_index,
            blob_store,
            running,
            in_flight,
            worker_handle: Some(worker_handle),
            fetcher_handle: Some(fetcher_handle),
            destroyed: false,
        })
    }

    /// Stale-while-revalidate. A disk hit enqueues an immediate
    /// read-and-deliver *before* the revalidation request is queued, so the
    /// application always observes the cached callback first.
    pub fn load(&self, url: &str) {
        if self.blob_store.exists(url) {
            self.work_queue.push(WorkItem::cache_read(url.to_string()));
        }
        self.load_queue.push(LoadItem {
            url: url.to_string(),
        });
    }

    /// Deletes the blob if present, clears (doesn't delete) the ETag entry
    /// so the next `load` is unconditional, and flushes the index so the
    /// sidecar reflects the removal even across a crash.
    pub fn remove(&self, url: &str) {
        if self.blob_store.exists(url) {
            self.blob_store.remove(url);
        }
        self.etag_index.lock().unwrap().clear_etag(url);
        if let Err(e) = self.etag_index.lock().unwrap().flush_to_disk() {
            warn!("remove({}): failed to flush etag index: {:#}", url, e);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            transfers_in_flight: self.in_flight.load(Ordering::SeqCst),
            load_queue_depth: self.load_queue.len(),
            work_queue_depth: self.work_queue.len(),
        }
    }

    /// Signals both threads to stop, joins the worker first (it owns the
    /// fetcher's lifetime) then the fetcher, and clears the index and any
    /// queued work. Consumes the handle so a destroyed cache can't be used
    /// again.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.running.store(false, Ordering::SeqCst);
        self.load_queue.notify_all();
        self.work_queue.notify_all();
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.fetcher_handle.take() {
            let _ = h.join();
        }
        self.etag_index.lock().unwrap().clear();
        self.load_queue.clear();
        self.work_queue.clear();
    }
}

impl Drop for ImageCache {
    /// Best-effort cleanup if the caller never called `destroy()`. Unlike
    /// `destroy`, this can't block the drop on a join the caller didn't ask
    /// for when handles were already taken (they weren't, if `destroyed` is
    /// still false) -- so it performs the same full shutdown, just
    /// implicitly. Calling `destroy()` explicitly is still preferred so
    /// shutdown happens at a predictable point.
    fn drop(&mut self) {
        self.shutdown();
    }
}
