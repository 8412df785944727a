//! Filesystem-backed cache store.
//!
//! Writes are atomic (temp file then rename) so a concurrent reader or
//! the reaper never observes a half-written image. Reads report any
//! failure as a miss; the pipeline regenerates on miss, so a file deleted
//! out from under us costs one extra derivation, not an error.

use super::paths::{component_is_safe, CachePaths};
use crate::key::CacheKey;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from cache store operations.
///
/// Only writes and startup produce errors. Read-side failures are
/// reported as misses instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("path component {component:?} would escape the cache root")]
    UnsafeComponent { component: String },
}

/// Metadata for one cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: CacheKey,
    pub filename: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// The local filesystem cache.
///
/// Presence is always established against the filesystem directly; the
/// reaper may delete any file at any time, and the next lookup simply
/// misses.
#[derive(Debug)]
pub struct CacheStore {
    paths: CachePaths,
}

impl CacheStore {
    /// Opens the store, creating the cache root if needed.
    ///
    /// An unwritable root is a startup failure; nothing else in the
    /// service can work without it.
    pub fn open<P: Into<PathBuf>>(local_root: P) -> Result<Self, CacheError> {
        let paths = CachePaths::new(local_root);
        fs::create_dir_all(paths.local_root()).map_err(|source| CacheError::CreateRoot {
            path: paths.local_root().to_path_buf(),
            source,
        })?;
        Ok(Self { paths })
    }

    /// The path layout this store writes into.
    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        self.paths.local_root()
    }

    /// Whether a cached file currently exists.
    pub fn contains(&self, namespace: &str, key: &CacheKey, filename: &str) -> bool {
        if !components_safe(namespace, key, filename) {
            return false;
        }
        self.paths.local_path(namespace, key, filename).is_file()
    }

    /// Whether the source image for a key is cached.
    pub fn has_source(&self, namespace: &str, key: &CacheKey) -> bool {
        self.contains(namespace, key, super::SOURCE_FILENAME)
    }

    /// Reads a cached file. Any failure, including a file the reaper
    /// removed after the presence check, is a miss.
    pub fn read(&self, namespace: &str, key: &CacheKey, filename: &str) -> Option<Vec<u8>> {
        if !components_safe(namespace, key, filename) {
            return None;
        }
        let path = self.paths.local_path(namespace, key, filename);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Reads the cached source image for a key.
    pub fn read_source(&self, namespace: &str, key: &CacheKey) -> Option<Vec<u8>> {
        self.read(namespace, key, super::SOURCE_FILENAME)
    }

    /// Writes a cached file atomically, creating parent directories as
    /// needed. Returns the final path.
    pub fn write(
        &self,
        namespace: &str,
        key: &CacheKey,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, CacheError> {
        for component in [namespace, key.as_str(), filename] {
            if !component_is_safe(component) {
                return Err(CacheError::UnsafeComponent {
                    component: component.to_string(),
                });
            }
        }
        let path = self.paths.local_path(namespace, key, filename);
        write_atomic(&path, bytes)?;
        debug!(path = %path.display(), size_bytes = bytes.len(), "cached file written");
        Ok(path)
    }

    /// Writes the source image for a key.
    pub fn write_source(
        &self,
        namespace: &str,
        key: &CacheKey,
        bytes: &[u8],
    ) -> Result<PathBuf, CacheError> {
        self.write(namespace, key, super::SOURCE_FILENAME, bytes)
    }

    /// Metadata for a cached file, or `None` when absent.
    pub fn entry(&self, namespace: &str, key: &CacheKey, filename: &str) -> Option<CacheEntry> {
        if !components_safe(namespace, key, filename) {
            return None;
        }
        let path = self.paths.local_path(namespace, key, filename);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(CacheEntry {
            namespace: namespace.to_string(),
            key: key.clone(),
            filename: filename.to_string(),
            size: metadata.len(),
            modified: metadata.modified().ok()?,
        })
    }
}

fn components_safe(namespace: &str, key: &CacheKey, filename: &str) -> bool {
    component_is_safe(namespace) && component_is_safe(key.as_str()) && component_is_safe(filename)
}

/// Writes `bytes` to `path` via a temp file in the same directory.
///
/// The rename is what makes concurrent readers safe: they see either the
/// old file or the new one, never a partial write.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let into_err = |source: std::io::Error| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().ok_or_else(|| {
        into_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "cache path has no parent directory",
        ))
    })?;
    fs::create_dir_all(parent).map_err(into_err)?;

    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));
    {
        let mut file = fs::File::create(&tmp).map_err(into_err)?;
        file.write_all(bytes).map_err(into_err)?;
        file.sync_all().map_err(into_err)?;
    }
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(into_err(source));
    }
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
