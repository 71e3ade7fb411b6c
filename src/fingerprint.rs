//! Content fingerprinting for duplicate detection and delivery verification.
//!
//! A fingerprint is the SHA-256 of the payload text after whitespace and
//! case normalization, so cosmetic differences (spacing, capitalization)
//! collapse onto the same fingerprint while part order still matters.

use sha2::{Digest, Sha256};

/// Normalize a text part: trim, collapse internal whitespace, lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Compute the content fingerprint over all payload parts.
///
/// Parts are normalized individually and joined with a newline before
/// hashing, so reordering parts produces a different fingerprint.
pub fn fingerprint(parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(normalize(part).as_bytes());
    }
    hex::encode(hasher.finalize())
}
