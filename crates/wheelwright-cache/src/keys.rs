//! Cache key derivation.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Derive the primary cache key for a namespace from the contents of its
/// key files.
///
/// Missing files contribute nothing to the hash, so a key can be derived
/// before the first lockfile is ever written.
pub fn derive_key(namespace: &str, key_files: &[&Path]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    for path in key_files {
        if let Ok(contents) = std::fs::read(path) {
            hasher.update(&contents);
        }
    }
    let hash = hasher.finalize();
    format!("{}-{}", namespace, hex::encode(&hash[..8]))
}

/// Check if a key matches a prefix pattern.
pub fn matches_prefix(key: &str, prefix: &str) -> bool {
    key.starts_with(prefix)
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_derive_key_shape() {
        let key = derive_key("pip", &[]);
        assert!(key.starts_with("pip-"));
        // namespace + '-' + 8 hashed bytes in hex
        assert_eq!(key.len(), "pip-".len() + 16);
    }

    #[test]
    fn test_derive_key_deterministic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "requests==2.31").unwrap();
        let path = file.path();

        let a = derive_key("pip", &[path]);
        let b = derive_key("pip", &[path]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_key_tracks_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "requests==2.31").unwrap();
        let before = derive_key("pip", &[file.path()]);

        writeln!(file, "numpy==1.26").unwrap();
        file.flush().unwrap();
        let after = derive_key("pip", &[file.path()]);

        assert_ne!(before, after);
    }

    #[test]
    fn test_derive_key_differs_by_namespace() {
        assert_ne!(derive_key("pip", &[]), derive_key("cargo", &[]));
    }

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("pip-abc123", "pip-"));
        assert!(matches_prefix("pip-abc123", "pip"));
        assert!(!matches_prefix("cargo-abc123", "pip-"));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("my/cache/key"), "my_cache_key");
        assert_eq!(sanitize_key("cache:key"), "cache_key");
    }
}
