//! Cache path layout.
//!
//! Every cached file lives at `{root}/{namespace}/{key}/{filename}`. The
//! fetched source is a sibling of its variants under the reserved name
//! [`SOURCE_FILENAME`]. Relative paths (without the root) double as the
//! object names mirrored to the remote store.

use crate::key::CacheKey;
use std::path::{Path, PathBuf};

/// Reserved filename the fetched source image is cached under.
pub const SOURCE_FILENAME: &str = "original";

/// Builds local and relative cache paths from the configured root.
#[derive(Debug, Clone)]
pub struct CachePaths {
    local_root: PathBuf,
}

impl CachePaths {
    pub fn new<P: Into<PathBuf>>(local_root: P) -> Self {
        Self {
            local_root: local_root.into(),
        }
    }

    /// The cache root directory.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Directory holding every file derived from one source.
    pub fn key_directory(&self, namespace: &str, key: &CacheKey) -> PathBuf {
        self.local_root.join(namespace).join(key.as_str())
    }

    /// Absolute local path of one cached file.
    pub fn local_path(&self, namespace: &str, key: &CacheKey, filename: &str) -> PathBuf {
        self.key_directory(namespace, key).join(filename)
    }

    /// Absolute local path of the cached source image.
    pub fn local_source_path(&self, namespace: &str, key: &CacheKey) -> PathBuf {
        self.local_path(namespace, key, SOURCE_FILENAME)
    }

    /// Root-relative path of one cached file, also used as the remote
    /// object name.
    ///
    /// An empty namespace contributes no segment, matching the local
    /// layout where joining an empty component is a no-op.
    pub fn relative_path(namespace: &str, key: &CacheKey, filename: &str) -> String {
        if namespace.is_empty() {
            format!("{key}/{filename}")
        } else {
            format!("{namespace}/{key}/{filename}")
        }
    }

    /// Root-relative path of the source image.
    pub fn relative_source_path(namespace: &str, key: &CacheKey) -> String {
        Self::relative_path(namespace, key, SOURCE_FILENAME)
    }
}

/// Whether a caller-supplied path component can be joined onto the cache
/// root without escaping it.
pub(crate) fn component_is_safe(component: &str) -> bool {
    !component.contains('/') && !component.contains('\\') && !component.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_layout() {
        let paths = CachePaths::new("/var/cache/images");
        let key = CacheKey::from_raw("products42");
        assert_eq!(
            paths.local_path("products", &key, "x300.jpg"),
            PathBuf::from("/var/cache/images/products/products42/x300.jpg")
        );
    }

    #[test]
    fn test_source_lives_beside_variants() {
        let paths = CachePaths::new("/var/cache/images");
        let key = CacheKey::from_raw("products42");
        assert_eq!(
            paths.local_source_path("products", &key),
            PathBuf::from("/var/cache/images/products/products42/original")
        );
    }

    #[test]
    fn test_relative_path_mirrors_local_layout() {
        let key = CacheKey::from_raw("products42");
        assert_eq!(
            CachePaths::relative_path("products", &key, "x300.jpg"),
            "products/products42/x300.jpg"
        );
        assert_eq!(
            CachePaths::relative_source_path("products", &key),
            "products/products42/original"
        );
    }

    #[test]
    fn test_empty_namespace_contributes_no_segment() {
        let key = CacheKey::from_raw("products42");
        assert_eq!(
            CachePaths::relative_path("", &key, "x300.jpg"),
            "products42/x300.jpg"
        );
        let paths = CachePaths::new("/var/cache/images");
        assert_eq!(
            paths.local_path("", &key, "x300.jpg"),
            PathBuf::from("/var/cache/images/products42/x300.jpg")
        );
    }

    #[test]
    fn test_component_safety() {
        assert!(component_is_safe("x300.jpg"));
        assert!(component_is_safe("catalog-photo_2024.jpeg"));
        assert!(!component_is_safe("../escape"));
        assert!(!component_is_safe("a/b.jpg"));
        assert!(!component_is_safe("a\\b.jpg"));
    }
}
