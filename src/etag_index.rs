//! In-memory URL -> ETag mapping, persisted to a `.etags` sidecar. Guarded
//! externally by a `Mutex` -- both the worker (startup load, eviction) and
//! the fetcher (lookup, update, flush) touch it concurrently.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tempfile::NamedTempFile;

use crate::filename::hash_hex;
use crate::prelude::*;

pub const SIDECAR_NAME: &str = ".etags";

/// `{ url, etag }`. `etag: None` means "we've seen this URL but have no
/// current validator" -- distinct from the URL having no entry at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtagEntry {
    pub url: String,
    pub etag: Option<String>,
}

#[derive(Debug)]
pub struct EtagIndex {
    entries: HashMap<String, EtagEntry>,
    sidecar_path: PathBuf,
}

impl EtagIndex {
    pub fn new(cache_dir: &Path) -> EtagIndex {
        EtagIndex {
            entries: HashMap::new(),
            sidecar_path: cache_dir.join(SIDECAR_NAME),
        }
    }

    /// Parse the sidecar's `URL SP ETAG LF` records. Tolerates truncation:
    /// stops at the first malformed or incomplete line rather than raising,
    /// keeping whatever was already parsed. A missing sidecar is not an
    /// error -- it just means a cold cache directory.
    pub fn load_from_disk(&mut self) -> Result<()> {
        let file = match fs::File::open(&self.sidecar_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("opening etag sidecar"),
        };
        let meta = file.metadata().context("statting etag sidecar")?;
        if meta.len() == 0 {
            return Ok(());
        }
        // Safety: the sidecar is only ever replaced via atomic rename
        // (flush_to_disk), never mutated in place, so a concurrent writer
        // can't invalidate bytes we've already mapped.
        let mmap = unsafe { Mmap::map(&file).context("mapping etag sidecar")? };

        // `mmap.split(b'\n')` always yields one extra trailing fragment: the
        // empty tail if the file ends with a newline, or an unterminated
        // (incomplete) last line otherwise. Either way we stop there rather
        // than treating it as an entry, tolerating a truncated sidecar
        // instead of erroring out.
        let mut lines = mmap.split(|&b| b == b'\n').peekable();
        while let Some(line) = lines.next() {
            if lines.peek().is_none() {
                break;
            }
            let sep = match line.iter().position(|&b| b == b' ') {
                Some(pos) => pos,
                None => break, // malformed line, no separator: stop parsing
            };
            let url = match std::str::from_utf8(&line[..sep]) {
                Ok(s) => s,
                Err(_) => break,
            };
            let etag = match std::str::from_utf8(&line[sep + 1..]) {
                Ok(s) => s,
                Err(_) => break,
            };
            if url.is_empty() || etag.is_empty() {
                continue;
            }
            self.entries.insert(
                url.to_string(),
                EtagEntry {
                    url: url.to_string(),
                    etag: Some(etag.to_string()),
                },
            );
        }
        Ok(())
    }

    pub fn lookup(&self, url: &str) -> Option<&EtagEntry> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates the entry if absent, replaces the ETag otherwise. Takes
    /// ownership of `url`/`etag` rather than borrowing, since both are
    /// stored.
    pub fn insert_or_update(&mut self, url: String, etag: Option<String>) {
        self.entries
            .entry(url.clone())
            .and_modify(|e| e.etag = etag.clone())
            .or_insert(EtagEntry { url, etag });
    }

    /// Forces the next fetch for `url` to be unconditional, while still
    /// remembering that we've seen it (used by `remove`, so the URL stays
    /// tracked for consistency even though we no longer trust its validator).
    pub fn clear_etag(&mut self, url: &str) {
        self.entries
            .entry(url.to_string())
            .and_modify(|e| e.etag = None)
            .or_insert_with(|| EtagEntry {
                url: url.to_string(),
                etag: None,
            });
    }

    /// Removes whichever entry's URL hashes to `filename_hex`, used by
    /// eviction when it only has a filename, not a URL, to work with.
    /// O(n) in the index size -- acceptable given how small the configured
    /// cache capacity is expected to be.
    pub fn delete_by_hash(&mut self, filename_hex: &str) -> bool {
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|url| hash_hex(url) == filename_hex)
            .cloned()
            .collect();
        let removed = !matching.is_empty();
        for url in matching {
            self.entries.remove(&url);
        }
        removed
    }

    /// Atomically replaces the sidecar (write-to-temp + rename). Entries
    /// with a missing ETag, or a URL/ETag containing a space or newline (the
    /// line format has no escaping), are omitted rather than corrupting the
    /// file.
    pub fn flush_to_disk(&self) -> Result<()> {
        let dir = self
            .sidecar_path
            .parent()
            .expect("sidecar path always has a parent (the cache dir)");
        let mut tmp = NamedTempFile::new_in(dir).context("creating temp sidecar")?;
        {
            let f = tmp.as_file_mut();
            for entry in self.entries.values() {
                let etag = match &entry.etag {
                    Some(e) => e,
                    None => continue,
                };
                if is_unrepresentable(&entry.url) || is_unrepresentable(etag) {
                    warn!(
                        "skipping etag sidecar entry with space/newline in url or etag: {}",
                        entry.url
                    );
                    continue;
                }
                writeln!(f, "{} {}", entry.url, etag)?;
            }
            f.sync_all().context("syncing temp sidecar")?;
        }
        tmp.persist(&self.sidecar_path)
            .context("renaming temp sidecar into place")?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn is_unrepresentable(s: &str) -> bool {
    s.contains(' ') || s.contains('\n')
}
