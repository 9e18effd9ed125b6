//! Canonical cache keys.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hashed, canonical identifier for an upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start building a key for the named upstream operation.
    pub fn builder(operation: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            operation: normalize_name(operation),
            params: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collects request parameters in any order and produces a [`CacheKey`].
///
/// Parameter names are case-insensitive. Values keep their case unless added
/// with [`CacheKeyBuilder::param_ci`]; surrounding whitespace is trimmed and
/// inner runs collapse to a single space. Empty values are dropped, so an
/// absent optional parameter and an empty one produce the same key.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    operation: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Add a case-sensitive parameter (identifiers, cursors).
    pub fn param(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.push(name, normalize_value(value.as_ref()));
        self
    }

    /// Add a parameter whose value is compared case-insensitively.
    pub fn param_ci(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.push(name, normalize_value(value.as_ref()).to_lowercase());
        self
    }

    /// Add a parameter only when present.
    pub fn opt_param(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    fn push(&mut self, name: &str, value: String) {
        if !value.is_empty() {
            self.params.push((normalize_name(name), value));
        }
    }

    /// Canonical text form before hashing.
    pub fn canonical(&self) -> String {
        let mut params = self.params.clone();
        params.sort();

        // Length prefixes keep `a=b&c` and `a=b` + `c=` from colliding.
        let mut out = format!("{}:{}", self.operation.len(), self.operation);
        for (name, value) in &params {
            out.push_str(&format!("|{}:{}={}:{}", name.len(), name, value.len(), value));
        }
        out
    }

    pub fn build(self) -> CacheKey {
        let digest = Sha256::digest(self.canonical().as_bytes());
        CacheKey(format!("{:x}", digest))
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_order_does_not_matter() {
        let a = CacheKey::builder("playlistItems")
            .param("playlistId", "PL123")
            .param("pageToken", "CAUQAA")
            .build();
        let b = CacheKey::builder("playlistItems")
            .param("pageToken", "CAUQAA")
            .param("playlistId", "PL123")
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_name_case_and_whitespace_normalized() {
        let a = CacheKey::builder(" PlaylistItems ")
            .param("PLAYLISTID", "  PL123 ")
            .build();
        let b = CacheKey::builder("playlistitems")
            .param("playlistId", "PL123")
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_value_case_is_preserved_by_default() {
        let a = CacheKey::builder("playlistItems")
            .param("playlistId", "PLabc")
            .build();
        let b = CacheKey::builder("playlistItems")
            .param("playlistId", "PLABC")
            .build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_param_ci_folds_value_case() {
        let a = CacheKey::builder("op").param_ci("part", "Snippet").build();
        let b = CacheKey::builder("op").param_ci("part", "snippet").build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_and_empty_optional_params_collide() {
        let a = CacheKey::builder("playlistItems")
            .param("playlistId", "PL1")
            .opt_param("pageToken", None)
            .build();
        let b = CacheKey::builder("playlistItems")
            .param("playlistId", "PL1")
            .param("pageToken", "   ")
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_length_prefix_prevents_ambiguity() {
        let a = CacheKey::builder("op").param("a", "b|1:c=0:").build();
        let b = CacheKey::builder("op").param("a", "b").param("c", "x").build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = CacheKey::builder("op").param("x", "1").build();
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
