//! End-to-end behavior tests driving a real `ImageCache` against a
//! `mockito` origin instead of exercising the fetcher/worker components
//! directly. Placed under `tests/` rather than an in-crate `#[cfg(test)]`
//! module since these exercise the crate the way an embedding application
//! would, through the public API only.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use mockito::Matcher;
use tempfile::TempDir;

use imgcache::{Config, ImageCache};

/// Collects callback deliveries and lets a test wait for the next one with
/// a bounded timeout instead of sleeping blindly.
struct Deliveries {
    rx: mpsc::Receiver<(String, Vec<u8>)>,
}

impl Deliveries {
    fn next(&self) -> (String, Vec<u8>) {
        self.rx
            .recv_timeout(Duration::from_secs(10))
            .expect("expected a callback delivery within 10s")
    }

    fn none_within(&self, d: Duration) {
        match self.rx.recv_timeout(d) {
            Err(RecvTimeoutError::Timeout) => {}
            other => panic!("expected no further delivery, got {:?}", other),
        }
    }
}

fn cache(dir: &TempDir) -> (ImageCache, Deliveries) {
    let (tx, rx) = mpsc::channel();
    let config = Config::new(dir.path()).with_max_requests(2);
    let cache = ImageCache::init(config, move |url, bytes| {
        let _ = tx.send((url.to_string(), bytes.to_vec()));
    })
    .unwrap();
    (cache, Deliveries { rx })
}

#[test]
fn cold_start_populates_cache_and_sidecar() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let _m = server
        .mock("GET", "/a.png")
        .with_status(200)
        .with_header("ETag", "\"v1\"")
        .with_body("B1")
        .create();
    let url = format!("{}/a.png", server.url());

    let (cache, deliveries) = cache(&dir);
    cache.load(&url);

    let (got_url, bytes) = deliveries.next();
    assert_eq!(got_url, url);
    assert_eq!(bytes, b"B1");

    let filename = imgcache::filename::filename_of(&url);
    assert!(dir.path().join(&filename).is_file());

    cache.destroy();
    let sidecar = std::fs::read_to_string(dir.path().join(".etags")).unwrap();
    assert_eq!(sidecar, format!("{} v1\n", url));
}

#[test]
fn not_modified_delivers_two_callbacks_with_same_bytes() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let _m1 = server
        .mock("GET", "/a.png")
        .with_status(200)
        .with_header("ETag", "\"v1\"")
        .with_body("B1")
        .create();
    let url = format!("{}/a.png", server.url());

    {
        let (cache, deliveries) = cache(&dir);
        cache.load(&url);
        deliveries.next();
        cache.destroy();
    }

    let _m2 = server
        .mock("GET", "/a.png")
        .match_header("if-none-match", Matcher::Exact("\"v1\"".into()))
        .with_status(304)
        .create();

    let (cache, deliveries) = cache(&dir);
    cache.load(&url);

    let first = deliveries.next();
    let second = deliveries.next();
    assert_eq!(first.1, b"B1");
    assert_eq!(second.1, b"B1");

    cache.destroy();
    let sidecar = std::fs::read_to_string(dir.path().join(".etags")).unwrap();
    assert_eq!(sidecar, format!("{} v1\n", url));
}

#[test]
fn changed_resource_delivers_disk_copy_then_new_bytes() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let _m1 = server
        .mock("GET", "/a.png")
        .with_status(200)
        .with_header("ETag", "\"v1\"")
        .with_body("B1")
        .create();
    let url = format!("{}/a.png", server.url());

    {
        let (cache, deliveries) = cache(&dir);
        cache.load(&url);
        deliveries.next();
        cache.destroy();
    }

    let _m2 = server
        .mock("GET", "/a.png")
        .with_status(200)
        .with_header("ETag", "\"v2\"")
        .with_body("B2")
        .create();

    let (cache, deliveries) = cache(&dir);
    cache.load(&url);

    let first = deliveries.next();
    let second = deliveries.next();
    assert_eq!(first.1, b"B1");
    assert_eq!(second.1, b"B2");

    cache.destroy();
    let filename = imgcache::filename::filename_of(&url);
    assert_eq!(std::fs::read(dir.path().join(&filename)).unwrap(), b"B2");
    let sidecar = std::fs::read_to_string(dir.path().join(".etags")).unwrap();
    assert_eq!(sidecar, format!("{} v2\n", url));
}

#[test]
fn remove_forces_unconditional_revalidation() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let _m1 = server
        .mock("GET", "/a.png")
        .with_status(200)
        .with_header("ETag", "\"v1\"")
        .with_body("B1")
        .create();
    let url = format!("{}/a.png", server.url());

    {
        let (cache, deliveries) = cache(&dir);
        cache.load(&url);
        deliveries.next();
        cache.remove(&url);
        cache.destroy();
    }

    let _m2 = server
        .mock("GET", "/a.png")
        .match_header("if-none-match", Matcher::Missing)
        .with_status(200)
        .with_header("ETag", "\"v3\"")
        .with_body("B3")
        .create();

    let (cache, deliveries) = cache(&dir);
    cache.load(&url);

    // removed: no disk copy left, so only the network result is delivered.
    let only = deliveries.next();
    assert_eq!(only.1, b"B3");
    deliveries.none_within(Duration::from_millis(200));

    cache.destroy();
    _m2.assert();
    let sidecar = std::fs::read_to_string(dir.path().join(".etags")).unwrap();
    assert_eq!(sidecar, format!("{} v3\n", url));
}

#[test]
fn transport_failure_on_cold_load_delivers_empty_bytes() {
    let dir = TempDir::new().unwrap();
    // Port 0 never accepts connections; the transport fails immediately.
    let url = "http://127.0.0.1:0/nope.png".to_string();

    let (cache, deliveries) = cache(&dir);
    cache.load(&url);

    let (got_url, bytes) = deliveries.next();
    assert_eq!(got_url, url);
    assert!(bytes.is_empty());

    cache.destroy();
    assert!(!dir.path().join(".etags").exists());
}
