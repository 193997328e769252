//! One file per cached URL, named by the filename deriver. The filesystem is
//! the only lock: only the worker thread ever writes or removes blobs, so
//! this type needs no internal synchronization of its own.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use memmap2::Mmap;
use tempfile::NamedTempFile;

use crate::etag_index::EtagIndex;
use crate::filename::{filename_of, hex_suffix, is_cache_filename};
use crate::prelude::*;

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: &Path) -> std::io::Result<BlobStore> {
        fs::create_dir_all(dir)?;
        Ok(BlobStore {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(filename_of(url))
    }

    pub fn exists(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    /// Memory-maps the file, copies it into a heap buffer, and unmaps before
    /// returning -- the mapping (and the fd backing it) never outlives this
    /// call, so a later write/remove of the same blob can't invalidate
    /// memory a caller is still holding onto.
    pub fn read(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.path_for(url);
        let file = File::open(&path).ok()?;
        let len = file.metadata().ok()?.len();
        if len == 0 {
            return None;
        }
        let mmap = unsafe { Mmap::map(&file).ok()? };
        let buf = mmap.to_vec();
        drop(mmap);
        Some(buf)
    }

    /// Write-to-temp + rename, so a reader never observes a partial file. On
    /// a short write the partial temp file is simply dropped (which deletes
    /// it) rather than persisted.
    pub fn write(&self, url: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(url);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Best-effort delete; a missing file is not an error.
    pub fn remove(&self, url: &str) {
        let _ = fs::remove_file(self.path_for(url));
    }

    /// Enumerates directory entries matching the fixed `PREFIX`/length shape,
    /// in directory-iteration order (the eviction tiebreak), and removes
    /// whichever ones exceed `max_size` or have gone stale past `max_time`.
    /// Every removal is mirrored in the ETag index via `delete_by_hash`, and
    /// the index is flushed once at the end if anything was actually
    /// removed.
    pub fn scan_and_evict(
        &self,
        index: &Mutex<EtagIndex>,
        max_size: usize,
        max_time: Duration,
    ) -> std::io::Result<usize> {
        let now = std::time::SystemTime::now();
        let mut kept = 0usize;
        let mut removed = 0usize;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if !is_cache_filename(name) {
                continue;
            }

            let should_remove = if kept >= max_size {
                true
            } else {
                is_stale(&entry, now, max_time)
            };

            if should_remove {
                let _ = fs::remove_file(entry.path());
                if let Some(hex) = hex_suffix(name) {
                    index.lock().unwrap().delete_by_hash(hex);
                }
                removed += 1;
            } else {
                kept += 1;
            }
        }

        if removed > 0 {
            if let Err(e) = index.lock().unwrap().flush_to_disk() {
                warn!("failed to flush etag index after eviction: {:#}", e);
            }
        }
        Ok(removed)
    }
}

/// Uses atime as the "still relevant" signal, since reads are what continued
/// relevance looks like. Platforms without atime tracking (or mounted
/// `noatime`) fall back to mtime instead.
fn is_stale(entry: &fs::DirEntry, now: std::time::SystemTime, max_time: Duration) -> bool {
    let meta = match entry.metadata() {
        Ok(m) => m,
        Err(_) => return false,
    };
    let reference_time = meta.accessed().or_else(|_| meta.modified());
    match reference_time {
        Ok(t) => match now.duration_since(t) {
            Ok(age) => age > max_time,
            Err(_) => false, // timestamp in the future; don't evict on clock skew
        },
        Err(_) => false,
    }
}
