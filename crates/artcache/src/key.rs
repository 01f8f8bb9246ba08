use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// The derived identifier of a remote resource, used to index both cache
/// tiers and the in-flight fetch registry.
///
/// Keys are a SHA-256 digest over the locator, so identical locators always
/// produce identical keys and distinct locators do not collide in practice.
/// The locator is retained for log output only; equality, ordering and
/// hashing consider the digest alone.
#[derive(Debug, Clone, Eq)]
pub struct ResourceKey {
    locator: Arc<str>,
    hash: [u8; 32],
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for ResourceKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for ResourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, " ({})", self.locator)
    }
}

impl ResourceKey {
    /// Derives the key for a locator.
    ///
    /// Pure and total: never fails, never blocks, deterministic across runs.
    /// The result names the on-disk cache file, so it must stay stable
    /// between releases.
    pub fn from_locator(locator: &str) -> Self {
        Self {
            locator: locator.into(),
            hash: Sha256::digest(locator.as_bytes()).into(),
        }
    }

    /// Returns the locator this key was derived from.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Renders the digest as the 64-character lowercase hex string used as
    /// the disk tier's file name.
    ///
    /// Hex output only, so the name is safe on every filesystem.
    pub fn file_name(&self) -> String {
        let mut name = String::with_capacity(2 * self.hash.len());
        for b in &self.hash {
            let _ = write!(name, "{b:02x}");
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = ResourceKey::from_locator("https://example.com/cover.jpg");
        let b = ResourceKey::from_locator("https://example.com/cover.jpg");

        assert_eq!(a, b);
        assert_eq!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_distinct_locators_do_not_collide() {
        let a = ResourceKey::from_locator("https://example.com/cover.jpg");
        let b = ResourceKey::from_locator("https://example.com/cover.png");

        assert_ne!(a, b);
        assert_ne!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_file_name_shape() {
        let key = ResourceKey::from_locator("https://example.com/episode/42/art?size=600");
        let name = key.file_name();

        assert_eq!(name.len(), 64);
        assert!(name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn test_stable_digest() {
        let key = ResourceKey::from_locator("hello");
        assert_eq!(
            key.file_name(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
