//! Shared SHA-256 hex digest utilities.
//!
//! Used by `checksum`, `audit`, and the backup service so every digest in
//! the system is computed the same way.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Compute a SHA-256 hex digest over several byte slices joined by `|`.
///
/// Equivalent to hashing the concatenation with separators, without
/// allocating the joined buffer.
pub fn sha256_hex_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parts_match_joined_input() {
        let joined = sha256_hex(b"seed|payload");
        let parts = sha256_hex_parts(&[b"seed", b"payload"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn part_boundaries_matter() {
        assert_ne!(
            sha256_hex_parts(&[b"ab", b"c"]),
            sha256_hex_parts(&[b"a", b"bc"])
        );
    }
}
