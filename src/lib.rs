//! Asynchronous, on-disk image cache with ETag revalidation against an HTTP
//! origin.
//!
//! ```no_run
//! use imgcache::{Config, ImageCache};
//!
//! let config = Config::new("/tmp/imgcache-demo");
//! let cache = ImageCache::init(config, |url, bytes| {
//!     println!("{}: {} bytes", url, bytes.len());
//! }).unwrap();
//!
//! cache.load("https://example.com/a.png");
//! cache.destroy();
//! ```

pub mod blob_store;
pub mod config;
pub mod error;
pub mod etag_index;
pub mod fetcher;
pub mod filename;
mod prelude;
pub mod queue;
pub mod transfer;
pub mod types;
pub mod worker;

mod handle;

pub use config::Config;
pub use error::CacheError;
pub use handle::{CacheStats, ImageCache};
