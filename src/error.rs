use std::path::PathBuf;

use thiserror::Error;

/// Errors that can actually reach a caller.
///
/// Almost everything that can go wrong in this crate happens deep in the
/// fetcher or worker threads, long after any `Result` could propagate back
/// to an application -- those conditions are logged and recovered locally
/// (see the `warn!` calls throughout `fetcher.rs` and `worker.rs`), never
/// surfaced here. `CacheError` only covers the `init`-time failures that a
/// caller can meaningfully act on.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CacheDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
