use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{KegError, KegResult};

/// Computes the SHA-256 digest of a file, streaming in chunks, and returns
/// it as lowercase hex.
pub fn hash_file<P: AsRef<Path>>(path: P) -> KegResult<String> {
    let mut file = File::open(&path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compares a staged file against its expected digest. Pass or fail only;
/// a mismatch is always fatal and must precede any build or install step.
pub fn verify<P: AsRef<Path>>(path: P, expected: &str) -> KegResult<()> {
    let actual = hash_file(&path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(KegError::ChecksumMismatch {
            path: path.as_ref().to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}

/// Whether a string looks like a SHA-256 hex digest.
pub fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
