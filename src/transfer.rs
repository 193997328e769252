//! The fetcher's bounded pool of in-flight HTTP transfers -- its "multiplex
//! group".
//!
//! `ureq` is a blocking client with no libcurl-multi-style non-blocking
//! multiplexing API, and the HTTP client's internals are treated as an
//! external dependency rather than something to reimplement. So instead of
//! driving one `select`-able handle set, each admitted transfer runs its
//! blocking request on its own short-lived thread, gated by an atomic
//! counter so at most `max_requests` are ever in flight, and reports its
//! outcome back over a channel the fetcher polls with a timeout -- the same
//! "wait up to ~1s, then look at what's done" shape a multiplex loop would
//! have.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use native_tls::TlsConnector;
use once_cell::sync::Lazy;
use ureq::{Agent, AgentBuilder};

use crate::prelude::*;
use crate::types::LoadItem;

/// Caps how much of a response body we'll buffer in memory per transfer,
/// so an unbounded response can't exhaust memory.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

fn build_agent() -> Agent {
    // SSL verification disabled by design. This is an explicit security
    // tradeoff -- an embedder targeting a stricter posture should make it
    // configurable rather than relying on this default.
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .expect("failed to build permissive TLS connector");
    AgentBuilder::new()
        .tls_connector(Arc::new(connector))
        .redirects(10)
        .timeout(Duration::from_secs(60))
        .build()
}

static AGENT: Lazy<Agent> = Lazy::new(build_agent);

#[derive(Debug)]
pub enum TransferResult {
    /// `body: None` covers both a 304 response and a response with an empty
    /// body; `etag` is the validator to remember going forward (unchanged
    /// from what was sent, for a 304; freshly parsed, for a 200).
    Success {
        body: Option<Vec<u8>>,
        etag: Option<String>,
    },
    /// Transport errors, DNS errors, timeouts, and malformed responses all
    /// collapse here.
    Failed,
}

#[derive(Debug)]
pub struct TransferOutcome {
    pub url: String,
    /// The `If-None-Match` value this transfer was sent with, if any --
    /// used by the fetcher to seed a first-time index entry.
    pub etag_used: Option<String>,
    pub result: TransferResult,
}

/// Bounds how many blocking transfers run concurrently and hands completed
/// ones back over `completions`.
pub struct TransferPool {
    max_requests: usize,
    in_flight: Arc<AtomicUsize>,
    completions_tx: Sender<TransferOutcome>,
    pub completions: Receiver<TransferOutcome>,
}

impl TransferPool {
    pub fn new(max_requests: usize, in_flight: Arc<AtomicUsize>) -> TransferPool {
        let (tx, rx) = bounded(max_requests.max(1) * 2);
        TransferPool {
            max_requests,
            in_flight,
            completions_tx: tx,
            completions: rx,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) < self.max_requests
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Admits one load item: attaches the conditional header if we have an
    /// ETag for it, spawns the transfer thread, and registers it as
    /// in-flight before the thread has even started, closing the race where
    /// two admissions could both observe spare capacity.
    pub fn admit(&self, item: LoadItem, etag: Option<String>) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let tx = self.completions_tx.clone();
        let LoadItem { url } = item;
        let etag_used = etag.clone();
        thread::spawn(move || {
            trace!("fetcher: starting transfer for {}", url);
            let result = perform_transfer(&url, etag.as_deref());
            let _ = tx.send(TransferOutcome {
                url,
                etag_used,
                result,
            });
        });
    }

    /// Call once per item pulled off `completions` to release its slot.
    pub fn mark_completed(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn perform_transfer(url: &str, etag: Option<&str>) -> TransferResult {
    let mut req = AGENT.get(url);
    if let Some(etag) = etag {
        req = req.set("If-None-Match", &quote(etag));
    }
    match req.call() {
        Ok(resp) => read_outcome(resp, etag),
        // Any response the transport layer considers a "real" HTTP exchange
        // -- including 4xx/5xx -- is treated as a cache update, not a
        // failure. This known coarseness is kept rather than silently
        // tightened; a stricter implementation would reject non-2xx/304
        // bodies outright.
        Err(ureq::Error::Status(_status, resp)) => read_outcome(resp, etag),
        Err(ureq::Error::Transport(e)) => {
            warn!("fetcher: transport error for {}: {}", url, e);
            TransferResult::Failed
        }
    }
}

fn read_outcome(resp: ureq::Response, etag_sent: Option<&str>) -> TransferResult {
    if resp.status() == 304 {
        return TransferResult::Success {
            body: None,
            etag: etag_sent.map(str::to_string),
        };
    }
    let new_etag = parse_etag(&resp);
    let mut body = Vec::new();
    match resp
        .into_reader()
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut body)
    {
        Ok(_) if body.is_empty() => TransferResult::Success {
            body: None,
            etag: new_etag,
        },
        Ok(_) => TransferResult::Success {
            body: Some(body),
            etag: new_etag,
        },
        Err(e) => {
            warn!("fetcher: failed reading response body: {}", e);
            TransferResult::Failed
        }
    }
}

/// Scans the response's headers for one whose name begins with `ETag`, then
/// takes the double-quote-delimited value. Ignores anything ill-formed
/// rather than erroring.
fn parse_etag(resp: &ureq::Response) -> Option<String> {
    resp.headers_names()
        .iter()
        .find(|name| name.to_ascii_lowercase().starts_with("etag"))
        .and_then(|name| resp.header(name))
        .and_then(extract_quoted)
}

fn extract_quoted(raw: &str) -> Option<String> {
    let start = raw.find('"')?;
    let rest = &raw[start + 1..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn quote(etag: &str) -> String {
    format!("\"{}\"", etag.trim_matches('"'))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extract_quoted_value() {
        assert_eq!(extract_quoted("\"abc123\""), Some("abc123".to_string()));
        assert_eq!(extract_quoted("W/\"abc123\""), Some("abc123".to_string()));
        assert_eq!(extract_quoted("no quotes here"), None);
    }

    #[test]
    fn quote_is_idempotent_on_already_quoted_etags() {
        assert_eq!(quote("abc"), "\"abc\"");
        assert_eq!(quote("\"abc\""), "\"abc\"");
    }
}
