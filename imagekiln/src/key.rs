//! Cache key derivation.
//!
//! A [`CacheKey`] names one source image. Every variant derived from that
//! source lives under the key's directory, and the request-coalescing gate
//! serializes pipeline work per key.

use std::fmt;

/// Identity of a source image within a namespace.
///
/// Derived by concatenating the namespace with up to four identity
/// segments, in order, with no separator and no hashing. Two requests
/// naming the same source always derive the same key, which is what makes
/// coalescing and cache sharing work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from a namespace and up to four identity segments.
    ///
    /// Empty segments contribute nothing; the caller decides how many of
    /// the four positions carry meaning.
    pub fn derive(namespace: &str, segments: [&str; 4]) -> Self {
        let mut key = String::with_capacity(
            namespace.len() + segments.iter().map(|s| s.len()).sum::<usize>(),
        );
        key.push_str(namespace);
        for segment in segments {
            key.push_str(segment);
        }
        CacheKey(key)
    }

    /// Wraps an already-derived key, e.g. one read back from a cache path.
    pub fn from_raw<S: Into<String>>(raw: S) -> Self {
        CacheKey(raw.into())
    }

    /// The key as a path-safe string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key carries any identity at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
