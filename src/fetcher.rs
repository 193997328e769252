//! The fetcher thread: one long-lived loop that keeps up to `max_requests`
//! HTTP transfers in flight, attaches conditional-request headers from the
//! ETag index, and posts completed transfers onto the work queue for the
//! worker to persist/deliver.
//!
//! A libcurl-style multiplex group driven by `select`/poll is the classic
//! shape for this kind of loop. `transfer.rs` realizes the same "admit up to
//! N, wait up to ~1s, collect whatever finished" behavior with a bounded pool
//! of blocking OS threads instead (see its module doc for why).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::blob_store::BlobStore;
use crate::etag_index::EtagIndex;
use crate::prelude::*;
use crate::queue::{LoadQueue, WorkQueue};
use crate::transfer::{TransferOutcome, TransferPool, TransferResult};
use crate::types::WorkItem;

/// How long a single progress-phase wait blocks before re-checking the
/// running flag -- ideally the smaller of one second and the HTTP library's
/// recommended timeout, but `ureq` doesn't expose a recommended poll
/// interval, so we just use the one-second ceiling.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Fetcher {
    load_queue: Arc<LoadQueue>,
    work_queue: Arc<WorkQueue>,
    etag_index: Arc<Mutex<EtagIndex>>,
    blob_store: Arc<BlobStore>,
    running: Arc<std::sync::atomic::AtomicBool>,
    pool: TransferPool,
}

impl Fetcher {
    pub fn new(
        load_queue: Arc<LoadQueue>,
        work_queue: Arc<WorkQueue>,
        etag_index: Arc<Mutex<EtagIndex>>,
        blob_store: Arc<BlobStore>,
        running: Arc<std::sync::atomic::AtomicBool>,
        max_requests: usize,
        in_flight: Arc<std::sync::atomic::AtomicUsize>,
    ) -> Fetcher {
        Fetcher {
            load_queue,
            work_queue,
            etag_index,
            blob_store,
            running,
            pool: TransferPool::new(max_requests, in_flight),
        }
    }

    /// Runs until `running` flips false. Each iteration is admission,
    /// idle-or-progress, then completion handling, with a flush folded into
    /// completion handling whenever the index actually changed.
    pub fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            self.admit_ready();

            if self.pool.in_flight_count() == 0 {
                trace!("fetcher: idle, waiting for load queue");
                self.load_queue
                    .wait_while_empty(|| self.running.load(Ordering::SeqCst));
                continue;
            }

            let outcomes = self.drive_progress();
            if outcomes.is_empty() {
                continue; // woken by shutdown with nothing finished
            }

            let mut dirty = false;
            for outcome in outcomes {
                self.pool.mark_completed();
                if self.handle_completion(outcome) {
                    dirty = true;
                }
            }
            if dirty {
                if let Err(e) = self.etag_index.lock().unwrap().flush_to_disk() {
                    warn!("fetcher: failed to flush etag index: {:#}", e);
                }
            }
        }
        trace!("fetcher: running flag cleared, exiting");
    }

    /// Admission phase: pop load items while the transfer pool has spare
    /// capacity, attaching `If-None-Match` from the ETag index when the blob
    /// is already on disk.
    fn admit_ready(&self) {
        while self.pool.has_capacity() {
            let item = match self.load_queue.try_pop() {
                Some(item) => item,
                None => break,
            };
            let etag = if self.blob_store.exists(&item.url) {
                self.etag_index
                    .lock()
                    .unwrap()
                    .lookup(&item.url)
                    .and_then(|e| e.etag.clone())
            } else {
                None
            };
            trace!("fetcher: admitting {} (etag={:?})", item.url, etag);
            self.pool.admit(item, etag);
        }
    }

    /// Progress phase: blocks in short slices until at least one transfer
    /// has completed, or shutdown is requested. Drains everything else that
    /// is immediately ready so a burst of completions is handled in one
    /// batch rather than one iteration per transfer.
    fn drive_progress(&self) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::new();
        while outcomes.is_empty() && self.running.load(Ordering::SeqCst) {
            match self.pool.completions.recv_timeout(POLL_INTERVAL) {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    while let Ok(o) = self.pool.completions.try_recv() {
                        outcomes.push(o);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        outcomes
    }

    /// Returns whether the ETag index was actually mutated, so the caller
    /// can decide whether a flush is warranted this batch.
    fn handle_completion(&self, outcome: TransferOutcome) -> bool {
        let TransferOutcome {
            url,
            etag_used,
            result,
        } = outcome;

        // The "ensure an index entry exists" step only applies to the
        // success path: a failed transfer tells us nothing new about the
        // URL, so it must not fabricate an entry.
        match result {
            TransferResult::Success { body, etag } => {
                let mut index = self.etag_index.lock().unwrap();
                let had_entry = index.lookup(&url).is_some();
                if !had_entry {
                    index.insert_or_update(url.clone(), etag_used);
                }
                let mut dirty = !had_entry;

                let work_item = match body {
                    Some(bytes) => {
                        index.insert_or_update(url.clone(), etag);
                        dirty = true;
                        WorkItem::downloaded(url, bytes)
                    }
                    None => WorkItem::cache_read(url),
                };
                drop(index);
                self.work_queue.push(work_item);
                dirty
            }
            TransferResult::Failed => {
                self.work_queue.push(WorkItem::failed(url));
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::LoadItem;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;
    use tempfile::TempDir;

    fn fetcher(dir: &TempDir, max_requests: usize) -> (Fetcher, Arc<LoadQueue>, Arc<WorkQueue>) {
        let load_queue = Arc::new(LoadQueue::new());
        let work_queue = Arc::new(WorkQueue::new());
        let etag_index = Arc::new(Mutex::new(EtagIndex::new(dir.path())));
        let blob_store = Arc::new(BlobStore::new(dir.path()).unwrap());
        let running = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let fetcher = Fetcher::new(
            load_queue.clone(),
            work_queue.clone(),
            etag_index,
            blob_store,
            running,
            max_requests,
            in_flight,
        );
        (fetcher, load_queue, work_queue)
    }

    #[test]
    fn admit_ready_respects_capacity_without_network() {
        // Exercises the admission gate alone: with max_requests=0 nothing
        // should ever be admitted, regardless of queue depth.
        let dir = TempDir::new().unwrap();
        let (fetcher, load_queue, _work_queue) = fetcher(&dir, 0);
        load_queue.push(LoadItem {
            url: "https://example.com/a".into(),
        });
        fetcher.admit_ready();
        assert_eq!(fetcher.pool.in_flight_count(), 0);
        assert_eq!(load_queue.len(), 1);
    }

    #[test]
    fn handle_completion_failed_pushes_failed_work_item() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _lq, work_queue) = fetcher(&dir, 4);
        let dirty = fetcher.handle_completion(TransferOutcome {
            url: "https://example.com/a".into(),
            etag_used: None,
            result: TransferResult::Failed,
        });
        // Failure tells us nothing new about the url: no entry is
        // fabricated, so the index is never marked dirty.
        assert!(!dirty);
        assert!(fetcher
            .etag_index
            .lock()
            .unwrap()
            .lookup("https://example.com/a")
            .is_none());
        let item = work_queue.try_pop().unwrap();
        assert!(item.bytes.is_none());
        assert!(item.request_failed);
    }

    #[test]
    fn handle_completion_success_updates_index_and_pushes_bytes() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _lq, work_queue) = fetcher(&dir, 4);
        let dirty = fetcher.handle_completion(TransferOutcome {
            url: "https://example.com/a".into(),
            etag_used: None,
            result: TransferResult::Success {
                body: Some(b"hello".to_vec()),
                etag: Some("v1".into()),
            },
        });
        assert!(dirty);
        let item = work_queue.try_pop().unwrap();
        assert_eq!(item.bytes.as_deref(), Some(&b"hello"[..]));
        assert!(!item.request_failed);
        assert_eq!(
            fetcher
                .etag_index
                .lock()
                .unwrap()
                .lookup("https://example.com/a")
                .unwrap()
                .etag
                .as_deref(),
            Some("v1")
        );
    }

    #[test]
    fn not_modified_with_existing_entry_is_not_dirty() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _lq, work_queue) = fetcher(&dir, 4);
        fetcher
            .etag_index
            .lock()
            .unwrap()
            .insert_or_update("https://example.com/a".into(), Some("v1".into()));
        let dirty = fetcher.handle_completion(TransferOutcome {
            url: "https://example.com/a".into(),
            etag_used: Some("v1".into()),
            result: TransferResult::Success {
                body: None,
                etag: Some("v1".into()),
            },
        });
        assert!(!dirty);
        let item = work_queue.try_pop().unwrap();
        assert!(item.bytes.is_none());
        assert!(!item.request_failed);
    }

    #[test]
    fn run_exits_promptly_on_shutdown_while_idle() {
        let dir = TempDir::new().unwrap();
        let load_queue = Arc::new(LoadQueue::new());
        let work_queue = Arc::new(WorkQueue::new());
        let etag_index = Arc::new(Mutex::new(EtagIndex::new(dir.path())));
        let blob_store = Arc::new(BlobStore::new(dir.path()).unwrap());
        let running = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(Fetcher::new(
            load_queue.clone(),
            work_queue,
            etag_index,
            blob_store,
            running.clone(),
            4,
            in_flight,
        ));

        let f2 = fetcher.clone();
        let handle = thread::spawn(move || f2.run());
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
        load_queue.notify_all();
        handle.join().unwrap();
    }
}
