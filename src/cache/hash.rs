// src/cache/hash.rs

//! blake3 digests for cache keys and input fingerprints.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::fs::FileSystem;

/// Compute the hex digest of a single file's full byte stream.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading file for hashing: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hex digest of a UTF-8 string (used on canonical JSON payloads).
pub fn hash_str(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn mock_file_hash_matches_blake3() {
        let fs = MockFileSystem::new();
        fs.add_file("./test.txt", b"hello world".to_vec());

        let hash = compute_file_hash(&fs, Path::new("./test.txt")).unwrap();
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
        assert_eq!(hash, hash_str("hello world"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let fs = MockFileSystem::new();
        assert!(compute_file_hash(&fs, Path::new("./nope")).is_err());
    }
}
