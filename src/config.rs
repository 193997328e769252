use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CacheError;
use crate::prelude::*;

/// Parallel HTTP transfers the fetcher keeps in flight at once.
pub const DEFAULT_MAX_REQUESTS: usize = 4;
/// Maximum number of blob files `scan_and_evict` will keep.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 3;
/// atime-based TTL applied to surviving blobs.
pub const DEFAULT_CACHE_MAX_TIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Runtime tunables. Constructed with [`Config::new`] and refined with the
/// builder methods, or populated from environment variables with
/// [`Config::from_env`], layering overrides on top of hardcoded defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub max_requests: usize,
    pub cache_max_size: usize,
    pub cache_max_time: Duration,
}

impl Config {
    pub fn new(cache_dir: impl AsRef<Path>) -> Config {
        Config {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            max_requests: DEFAULT_MAX_REQUESTS,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            cache_max_time: DEFAULT_CACHE_MAX_TIME,
        }
    }

    /// Use the platform cache directory (`~/.cache/imgcache` and friends) if
    /// the embedding application doesn't care to pick one itself.
    pub fn with_default_dir() -> Result<Config, CacheError> {
        let dirs = PROJECT_DIRS.as_ref().ok_or_else(|| {
            CacheError::InvalidConfig(
                "could not determine a default cache directory for this platform".into(),
            )
        })?;
        Ok(Config::new(dirs.cache_dir()))
    }

    pub fn with_max_requests(mut self, n: usize) -> Config {
        self.max_requests = n;
        self
    }

    pub fn with_cache_max_size(mut self, n: usize) -> Config {
        self.cache_max_size = n;
        self
    }

    pub fn with_cache_max_time(mut self, d: Duration) -> Config {
        self.cache_max_time = d;
        self
    }

    /// Apply `IMGCACHE_MAX_REQUESTS` / `IMGCACHE_CACHE_MAX_SIZE` /
    /// `IMGCACHE_CACHE_MAX_TIME_SECS` overrides on top of whatever defaults or
    /// builder calls already set, ignoring unset or unparsable variables.
    pub fn from_env(cache_dir: impl AsRef<Path>) -> Config {
        let mut config = Config::new(cache_dir);
        if let Some(n) = env_usize("IMGCACHE_MAX_REQUESTS") {
            config.max_requests = n;
        }
        if let Some(n) = env_usize("IMGCACHE_CACHE_MAX_SIZE") {
            config.cache_max_size = n;
        }
        if let Some(secs) = env_usize("IMGCACHE_CACHE_MAX_TIME_SECS") {
            config.cache_max_time = Duration::from_secs(secs as u64);
        }
        config
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_requests == 0 {
            return Err(CacheError::InvalidConfig(
                "max_requests must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
