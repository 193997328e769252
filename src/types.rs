//! Payloads carried between the public API, the two queues, and the
//! fetcher/worker threads.

/// A pending URL the fetcher still needs to resolve against the origin.
/// Owned by whichever queue currently holds it; consumed once popped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadItem {
    pub url: String,
}

/// A completed unit of work for the worker thread to persist/deliver.
///
/// The three outcomes a completed transfer can have -- fresh bytes, a
/// not-modified/cache-read, or an outright failure -- are encoded in
/// `(bytes, request_failed)` rather than as an enum, to match the on-the-wire
/// shape the fetcher naturally produces (a response either has a body or it
/// doesn't, and failure is orthogonal to that).
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub url: String,
    pub bytes: Option<Vec<u8>>,
    pub request_failed: bool,
}

impl WorkItem {
    /// A fresh download that must be persisted and delivered.
    pub fn downloaded(url: String, bytes: Vec<u8>) -> WorkItem {
        WorkItem {
            url,
            bytes: Some(bytes),
            request_failed: false,
        }
    }

    /// The network attempt failed outright (transport error, timeout, ...).
    pub fn failed(url: String) -> WorkItem {
        WorkItem {
            url,
            bytes: None,
            request_failed: true,
        }
    }

    /// Either a 304 from the origin, or the disk-hit fast path requested by
    /// `load()`: in both cases the worker should just re-deliver whatever is
    /// already on disk.
    pub fn cache_read(url: String) -> WorkItem {
        WorkItem {
            url,
            bytes: None,
            request_failed: false,
        }
    }
}
