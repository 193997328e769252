//! The worker thread: on startup, loads the ETag index and runs eviction
//! before anything touches the network, then drains the work queue in
//! batches, persisting fresh downloads and dispatching the single
//! application callback per item.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::etag_index::EtagIndex;
use crate::fetcher::Fetcher;
use crate::prelude::*;
use crate::queue::{LoadQueue, WorkQueue};
use crate::types::WorkItem;

pub type DeliveryCallback = dyn Fn(&str, &[u8]) + Send + Sync + 'static;

pub struct Worker {
    config: Config,
    load_queue: Arc<LoadQueue>,
    work_queue: Arc<WorkQueue>,
    etag_index: Arc<Mutex<EtagIndex>>,
    blob_store: Arc<BlobStore>,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    callback: Arc<DeliveryCallback>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        load_queue: Arc<LoadQueue>,
        work_queue: Arc<WorkQueue>,
        etag_index: Arc<Mutex<EtagIndex>>,
        blob_store: Arc<BlobStore>,
        running: Arc<AtomicBool>,
        in_flight: Arc<AtomicUsize>,
        callback: Arc<DeliveryCallback>,
    ) -> Worker {
        Worker {
            config,
            load_queue,
            work_queue,
            etag_index,
            blob_store,
            running,
            in_flight,
            callback,
        }
    }

    /// Loads the ETag index from its sidecar and runs eviction. Split out
    /// from [`Worker::start`] so it can run (and be tested) without spawning
    /// any threads.
    fn run_startup(&self) {
        {
            let mut index = self.etag_index.lock().unwrap();
            if let Err(e) = index.load_from_disk() {
                warn!("worker: failed to load etag sidecar: {:#}", e);
            }
        }
        match self.blob_store.scan_and_evict(
            &self.etag_index,
            self.config.cache_max_size,
            self.config.cache_max_time,
        ) {
            Ok(n) if n > 0 => info!("worker: evicted {} stale/excess blob(s) at startup", n),
            Ok(_) => {}
            Err(e) => warn!("worker: startup eviction failed: {:#}", e),
        }
    }

    /// Startup sequence: load the index, evict, *then* start the fetcher,
    /// so the index is authoritative before any network activity can
    /// observe or mutate it. Returns both join handles so the caller
    /// (`ImageCache::init`) can hand them back to `destroy` -- the worker
    /// owns the fetcher's lifetime by being what spawns it.
    pub fn start(self) -> (JoinHandle<()>, JoinHandle<()>) {
        let max_requests = self.config.max_requests;
        self.run_startup();

        let fetcher = Fetcher::new(
            self.load_queue.clone(),
            self.work_queue.clone(),
            self.etag_index.clone(),
            self.blob_store.clone(),
            self.running.clone(),
            max_requests,
            self.in_flight.clone(),
        );
        let fetcher_handle = std::thread::Builder::new()
            .name("imgcache-fetcher".into())
            .spawn(move || fetcher.run())
            .expect("failed to spawn fetcher thread");

        let worker_handle = std::thread::Builder::new()
            .name("imgcache-worker".into())
            .spawn(move || self.run())
            .expect("failed to spawn worker thread");

        (worker_handle, fetcher_handle)
    }

    fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            let batch = self
                .work_queue
                .drain_or_wait(|| self.running.load(Ordering::SeqCst));
            if batch.is_empty() {
                continue; // woken by shutdown with nothing queued
            }
            for item in batch {
                self.dispatch(item);
            }
        }
        trace!("worker: running flag cleared, exiting");
    }

    fn dispatch(&self, item: WorkItem) {
        let WorkItem {
            url,
            bytes,
            request_failed,
        } = item;

        match (bytes, request_failed) {
            (Some(bytes), _) => {
                if let Err(e) = self.blob_store.write(&url, &bytes) {
                    warn!("worker: failed to persist blob for {}: {:#}", url, e);
                }
                (self.callback)(&url, &bytes);
            }
            (None, true) => match self.blob_store.read(&url) {
                Some(bytes) => (self.callback)(&url, &bytes),
                None => (self.callback)(&url, &[]),
            },
            // Either a 304, or the disk-hit fast path enqueued by `load()`.
            // Both carry the same WorkItem shape, and both need an actual
            // disk read-and-deliver: with a single work queue there is no
            // separate "already delivered elsewhere" moment to defer to, so
            // this always re-reads and re-delivers from disk rather than
            // doing nothing.
            (None, false) => match self.blob_store.read(&url) {
                Some(bytes) => (self.callback)(&url, &bytes),
                None => (self.callback)(&url, &[]),
            },
        }
    }
}
