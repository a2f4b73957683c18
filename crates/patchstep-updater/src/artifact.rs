//! Target integrity checks.
//!
//! A downloaded target must match the length and SHA-256 digest of its
//! listing entry before the codec sees it. Digests are compared in
//! constant time.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use crate::distribution::TargetInfo;
use crate::error::UpdateError;

/// Checks files against listing entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactVerifier;

impl ArtifactVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Check `path` against `target`: length first, then digest.
    ///
    /// # Errors
    ///
    /// `SizeMismatch` or `HashMismatch`, or the IO error reading the file.
    pub fn verify(&self, path: &Path, target: &TargetInfo) -> Result<(), UpdateError> {
        let length = std::fs::metadata(path)?.len();
        if length != target.length {
            error!(patch = %target.name, expected = target.length, actual = length, "Target length mismatch");
            return Err(UpdateError::SizeMismatch {
                expected: target.length,
                actual: length,
            });
        }

        let digest = self.compute_hash(path)?;
        if !bool::from(digest.ct_eq(&target.sha256)) {
            let (expected, actual) = (hex::encode(target.sha256), hex::encode(digest));
            error!(patch = %target.name, %expected, %actual, "Target digest mismatch");
            return Err(UpdateError::HashMismatch { expected, actual });
        }

        debug!(patch = %target.name, length, "Target verified");
        Ok(())
    }

    /// SHA-256 of a file's contents.
    pub fn compute_hash(&self, path: &Path) -> Result<[u8; 32], UpdateError> {
        let mut hasher = Sha256::new();
        io::copy(&mut File::open(path)?, &mut hasher)?;
        Ok(hasher.finalize().into())
    }
}

/// Decode a listing's hex digest; `None` unless it is exactly 32 bytes.
pub fn parse_sha256(hex_digest: &str) -> Option<[u8; 32]> {
    hex::decode(hex_digest.trim()).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn target_file(dir: &TempDir, content: &[u8]) -> (std::path::PathBuf, TargetInfo) {
        let path = dir.path().join("v0_8_0.patch");
        std::fs::write(&path, content).unwrap();
        let info = TargetInfo {
            name: "labbie/v0_8_0.patch".to_string(),
            length: content.len() as u64,
            sha256: Sha256::digest(content).into(),
        };
        (path, info)
    }

    #[test]
    fn test_compute_hash_known_content() {
        let dir = TempDir::new().unwrap();
        let (path, _) = target_file(&dir, b"hello world");
        let hash = ArtifactVerifier::new().compute_hash(&path).unwrap();
        assert_eq!(hex::encode(hash), HELLO_SHA256);
    }

    #[test]
    fn test_matching_target_verifies() {
        let dir = TempDir::new().unwrap();
        let (path, info) = target_file(&dir, b"patch bytes");
        assert!(ArtifactVerifier::new().verify(&path, &info).is_ok());
    }

    #[test]
    fn test_tampered_target_rejected() {
        let dir = TempDir::new().unwrap();
        let (path, info) = target_file(&dir, b"patch bytes");
        std::fs::write(&path, b"patch bytez").unwrap();
        assert!(matches!(
            ArtifactVerifier::new().verify(&path, &info),
            Err(UpdateError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_length_checked_before_digest() {
        let dir = TempDir::new().unwrap();
        let (path, mut info) = target_file(&dir, b"patch bytes");
        info.length = 3;
        info.sha256 = [0u8; 32];
        assert!(matches!(
            ArtifactVerifier::new().verify(&path, &info),
            Err(UpdateError::SizeMismatch { expected: 3, actual: 11 })
        ));
    }

    #[test]
    fn test_parse_sha256() {
        assert!(parse_sha256(HELLO_SHA256).is_some());
        assert!(parse_sha256(&format!(" {HELLO_SHA256}\n")).is_some());
        assert!(parse_sha256("abcd").is_none());
        assert!(parse_sha256("not hex").is_none());
    }
}
