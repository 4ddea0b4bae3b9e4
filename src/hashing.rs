//! Content-addressed key functions (C3): SHA-256 of file contents, CRC-64 of
//! strings. Both are pure functions over bytes; callers decide what they key.

use std::io::Read;
use std::path::Path;

use crc::{Crc, CRC_64_XZ};
use sha2::{Digest, Sha256};

use crate::error::{FsError, Result};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Lowercase hex SHA-256 of a file's contents. Empty files hash to the
/// SHA-256 of zero bytes (not the empty string sentinel the index engine
/// uses for directories — that is a type-level distinction, not a hashing
/// one).
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(FsError::Io)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(FsError::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex SHA-256 of an in-memory byte string, used for the stamp
/// checksum (§3.3) and any other canonical-bytes hashing.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// CRC-64/XZ of a string, used to derive deterministic, collision-resistant
/// cache-directory keys (§4.4.1, §4.4.5) without SHA-256's length.
pub fn crc64_str(s: &str) -> u64 {
    CRC64.checksum(s.as_bytes())
}

/// The tile-cache key for a source file: `CRC64(path + "*" + mtime + "*" + size)`,
/// formatted as lowercase hex so it is filesystem-safe on every platform.
pub fn tile_cache_key(source_path: &str, mtime: i64, tile_size: u32) -> String {
    let composite = format!("{source_path}*{mtime}*{tile_size}");
    format!("{:016x}", crc64_str(&composite))
}

/// Cache key for a remote URL (§4.4.5), when no a-priori content hash is
/// supplied by the caller.
pub fn url_cache_key(url: &str) -> String {
    format!("{:016x}", crc64_str(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_bytes_matches_known_vector() {
        assert_eq!(
            sha256_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn tile_cache_key_changes_with_mtime() {
        let a = tile_cache_key("/data/ortho.tif", 1000, 256);
        let b = tile_cache_key("/data/ortho.tif", 1001, 256);
        assert_ne!(a, b);
    }

    #[test]
    fn crc64_is_deterministic() {
        assert_eq!(crc64_str("hello"), crc64_str("hello"));
        assert_ne!(crc64_str("hello"), crc64_str("world"));
    }
}
