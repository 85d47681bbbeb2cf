//! Hashing utilities for content addressing and archive verification.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of hex characters in a full SHA-256 digest.
const CONTENT_HASH_LEN: usize = 64;

/// A full 64-character SHA-256 digest identifying archive content.
///
/// Identity implies content equality: two archives with the same
/// `ContentHash` hold the same bytes, which is what makes the cache's
/// content-addressed paths safe to share between packages.
///
/// # Format
///
/// Lowercase hexadecimal, e.g. `"9f86d081884c7d65..."`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Parse and validate a digest string.
  pub fn parse(s: &str) -> Result<Self, InvalidHash> {
    if s.len() != CONTENT_HASH_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
      return Err(InvalidHash(s.to_string()));
    }
    Ok(ContentHash(s.to_string()))
  }

  /// Validate an already-constructed digest (e.g. one deserialized from a manifest).
  pub fn validate(&self) -> Result<(), InvalidHash> {
    Self::parse(&self.0).map(|_| ())
  }

  /// Shortened prefix for log lines and marker file names.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A string that is not a lowercase 64-character hex SHA-256 digest.
#[derive(Debug, Error)]
#[error("invalid sha-256 digest '{0}' (expected 64 lowercase hex characters)")]
pub struct InvalidHash(pub String);

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

/// Hash a file's contents with a streaming read.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn hash_bytes_deterministic() {
    let h1 = hash_bytes(b"hello world");
    let h2 = hash_bytes(b"hello world");
    assert_eq!(h1, h2);
    assert_eq!(h1.0.len(), 64);
  }

  #[test]
  fn hash_bytes_differs_for_different_content() {
    assert_ne!(hash_bytes(b"one"), hash_bytes(b"two"));
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("data.bin");
    fs::write(&path, b"some archive bytes").unwrap();

    assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"some archive bytes"));
  }

  #[test]
  fn parse_accepts_valid_digest() {
    let digest = hash_bytes(b"x");
    assert!(ContentHash::parse(&digest.0).is_ok());
  }

  #[test]
  fn parse_rejects_short_input() {
    assert!(ContentHash::parse("abc123").is_err());
  }

  #[test]
  fn parse_rejects_uppercase() {
    let digest = hash_bytes(b"x").0.to_uppercase();
    assert!(ContentHash::parse(&digest).is_err());
  }

  #[test]
  fn parse_rejects_non_hex() {
    let bad = "z".repeat(64);
    assert!(ContentHash::parse(&bad).is_err());
  }

  #[test]
  fn short_prefix() {
    let digest = hash_bytes(b"x");
    assert_eq!(digest.short().len(), 12);
    assert!(digest.0.starts_with(digest.short()));
  }
}
