//! Cache key construction.

use sha2::{Digest, Sha256};

/// Prefix for cached robots.txt policies.
pub const ROBOTS_KEY_PREFIX: &str = "robots_parser_";

/// Cache key for the robots.txt policy of `domain`.
pub fn robots_cache_key(domain: &str) -> String {
    format!("{ROBOTS_KEY_PREFIX}{}", domain.to_ascii_lowercase())
}

/// Cache key for an indexer response, `indexer:<platform>:<part>:<part>...`.
///
/// Parts longer than 64 bytes (e.g. a long pointer list) are replaced by
/// their SHA-256 hex digest to keep keys bounded.
pub fn indexer_cache_key(platform: &str, parts: &[&str]) -> String {
    let mut key = format!("indexer:{platform}");
    for part in parts {
        key.push(':');
        if part.len() > 64 {
            key.push_str(&digest_hex(part.as_bytes()));
        } else {
            key.push_str(part);
        }
    }
    key
}

/// Stable SHA-256 fingerprint of a byte payload.
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robots_key_format() {
        assert_eq!(robots_cache_key("Example.COM"), "robots_parser_example.com");
    }

    #[test]
    fn test_indexer_key_format() {
        let key = indexer_cache_key("decentraland", &["catalyst", "scenes"]);
        assert_eq!(key, "indexer:decentraland:catalyst:scenes");
    }

    #[test]
    fn test_indexer_key_long_part_is_hashed() {
        let long = "0,0;".repeat(40);
        let key = indexer_cache_key("decentraland", &["scenes", &long]);
        let last = key.rsplit(':').next().unwrap();
        assert_eq!(last.len(), 64);
        assert!(last.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, indexer_cache_key("decentraland", &["scenes", &long]));
    }

    #[test]
    fn test_digest_stability() {
        assert_eq!(digest_hex(b"abc"), digest_hex(b"abc"));
        assert_ne!(digest_hex(b"abc"), digest_hex(b"abd"));
        assert_eq!(digest_hex(b"").len(), 64);
    }
}
