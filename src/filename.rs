//! Pure URL -> cache filename mapping.
//!
//! Any stable 128-bit non-cryptographic hash works here; this uses
//! `xxh3_128` via the `xxhash-rust` crate.

use xxhash_rust::xxh3::xxh3_128;

/// Two-character tag prepended to every cache filename.
pub const PREFIX: &str = "I$";
const HASH_BYTES: usize = 16;
/// Fixed total length eviction relies on to tell cache files apart from
/// unrelated directory entries.
pub const FILENAME_LEN: usize = PREFIX.len() + HASH_BYTES * 2;

/// `PREFIX ∥ hex(h128(url))`.
pub fn filename_of(url: &str) -> String {
    format!("{}{}", PREFIX, hash_hex(url))
}

/// Just the hex portion, lowercase -- what `delete_by_hash` compares against.
pub fn hash_hex(url: &str) -> String {
    hex::encode(xxh3_128(url.as_bytes()).to_be_bytes())
}

/// Whether `name` has the shape a cache blob filename must have: used by
/// `scan_and_evict` to ignore unrelated directory entries (the sidecar file,
/// stray `.lock` files, temp files, etc).
pub fn is_cache_filename(name: &str) -> bool {
    name.len() == FILENAME_LEN
        && name.starts_with(PREFIX)
        && name[PREFIX.len()..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// The hex suffix of a filename known to satisfy [`is_cache_filename`].
pub fn hex_suffix(name: &str) -> Option<&str> {
    is_cache_filename(name).then(|| &name[PREFIX.len()..])
}

/// Inverse of the hex encoding above. Filenames can't be turned back into
/// URLs (the hash isn't reversible), but this lets callers confirm the
/// encoding round-trips byte for byte, which is the invariant eviction
/// depends on when it recomputes a hash and compares hex strings.
pub fn hex_decode(hex_str: &str) -> Option<[u8; HASH_BYTES]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}
