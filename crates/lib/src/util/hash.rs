//! Hashing utilities for pins, migrations and staged content.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 digest
//! - `hash_bytes()`: arbitrary byte hashing
//! - `hash_lines()`: order-sensitive hashing of a line sequence

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl ContentHash {
  /// Returns the first `len` characters, for display.
  pub fn short(&self, len: usize) -> &str {
    &self.0[..len.min(self.0.len())]
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash a sequence of lines, each terminated by `\n`.
///
/// Line order is significant.
pub fn hash_lines<I, S>(lines: I) -> ContentHash
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut hasher = Sha256::new();
  for line in lines {
    hasher.update(line.as_ref().as_bytes());
    hasher.update(b"\n");
  }
  ContentHash(hex::encode(hasher.finalize()))
}
