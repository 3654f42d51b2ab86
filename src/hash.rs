//! Digest primitive used throughout the crate.
//!
//! Descriptors record every hash as lowercase hexadecimal text, and internal
//! tree nodes are hashed over the *text* of their children's digests, not the
//! raw digest bytes. Both rules live here so the parser, the builder and the
//! query engine agree on them.

use blake3::Hasher;

/// Minimum length of a well-formed digest string.
pub const MIN_HASH_LEN: usize = 64;

/// Minimum length of a package identifier.
pub const MIN_IDENT_LEN: usize = 1024;

/// Hash raw bytes into a lowercase hex digest.
pub fn digest(data: &[u8]) -> String {
  blake3::hash(data).to_hex().to_string()
}

/// Hash the concatenation of two child digests, as hex text.
pub fn combine(left: &str, right: &str) -> String {
  let mut hasher = Hasher::new();
  hasher.update(left.as_bytes());
  hasher.update(right.as_bytes());
  hasher.finalize().to_hex().to_string()
}

/// A well-formed digest is entirely hexadecimal and at least [`MIN_HASH_LEN`]
/// characters long.
pub fn is_well_formed(hash: &str) -> bool {
  hash.len() >= MIN_HASH_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Same rule as [`is_well_formed`] with the identifier minimum length.
pub fn is_well_formed_ident(ident: &str) -> bool {
  ident.len() >= MIN_IDENT_LEN && ident.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digest_is_lowercase_hex() {
    let d = digest(b"hello");
    assert_eq!(d.len(), MIN_HASH_LEN);
    assert!(d.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(d, d.to_lowercase());
  }

  #[test]
  fn combine_hashes_the_hex_text() {
    let left = digest(b"left");
    let right = digest(b"right");
    let concatenated = format!("{left}{right}");
    assert_eq!(combine(&left, &right), digest(concatenated.as_bytes()));
  }

  #[test]
  fn well_formed_rules() {
    assert!(is_well_formed(&"a".repeat(64)));
    assert!(is_well_formed(&"0123456789abcdefABCDEF".repeat(4)));
    assert!(!is_well_formed(&"a".repeat(63)));
    assert!(!is_well_formed(""));
    let mut bad = "a".repeat(63);
    bad.push('g');
    assert!(!is_well_formed(&bad));

    assert!(is_well_formed_ident(&"ab".repeat(512)));
    assert!(!is_well_formed_ident(&"ab".repeat(511)));
    assert!(!is_well_formed_ident(&"xy".repeat(512)));
  }
}
