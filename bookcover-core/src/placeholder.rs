use std::collections::HashSet;

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

/// The providers' stock "image not available" tiles, embedded so their
/// fingerprints are known before any network traffic happens.
static REFERENCE_PLACEHOLDERS: &[&[u8]] = &[
    include_bytes!("../assets/google-image-not-available.png"),
    include_bytes!("../assets/openlibrary-no-cover.png"),
];

/// Knows the SHA-256 fingerprints of reference placeholder images, so
/// downloads that are really a provider's "no cover" tile can be rejected
/// before they reach the cache.
pub struct PlaceholderRegistry {
    hashes: HashSet<String>,
}

impl PlaceholderRegistry {
    /// Fingerprint the embedded references. When no reference is available
    /// the registry matches nothing; that is logged once and is not an
    /// initialization failure.
    pub fn new() -> Self {
        Self::from_references(REFERENCE_PLACEHOLDERS)
    }

    pub fn from_references(references: &[&[u8]]) -> Self {
        let hashes: HashSet<String> = references
            .iter()
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| hash_bytes(bytes))
            .collect();
        if hashes.is_empty() {
            tracing::warn!("no reference placeholders loaded, fingerprint matching disabled");
        }
        Self { hashes }
    }

    /// Whether a content hash matches a known placeholder.
    pub fn matches(&self, content_hash: &str) -> bool {
        self.hashes.contains(content_hash)
    }
}

impl Default for PlaceholderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The bytes of the embedded Google reference tile. Exposed so tests can
/// serve a byte-exact placeholder from a fake provider.
pub fn reference_bytes() -> &'static [u8] {
    REFERENCE_PLACEHOLDERS[0]
}

/// Lowercase hex SHA-256, the content-hash format used throughout.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    HEXLOWER.encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_embedded_references() {
        let registry = PlaceholderRegistry::new();
        for reference in REFERENCE_PLACEHOLDERS {
            assert!(registry.matches(&hash_bytes(reference)));
        }
        assert!(!registry.matches(&hash_bytes(b"an actual cover")));
    }

    #[test]
    fn empty_registry_matches_nothing() {
        let registry = PlaceholderRegistry::from_references(&[]);
        assert!(!registry.matches(&hash_bytes(reference_bytes())));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_bytes(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_bytes(b"abc"), hash);
    }
}
