//! Upload backends.
//!
//! Two are built in: [`NoopUploader`] for local-only deployments and
//! [`DirectoryUploader`] for mirroring into a mounted filesystem. Cloud
//! stores plug in through the same [`Uploader`] trait.

use super::{UploadError, Uploader, UploaderConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Uploader that discards every object.
#[derive(Debug, Default)]
pub struct NoopUploader;

impl Uploader for NoopUploader {
    fn name(&self) -> &str {
        "noop"
    }

    async fn initialize(&self) -> Result<(), UploadError> {
        Ok(())
    }

    async fn upload(&self, relative_path: &str, _bytes: &[u8]) -> Result<(), UploadError> {
        trace!(path = relative_path, "noop uploader discarding object");
        Ok(())
    }
}

/// Uploader that mirrors objects into a directory tree.
///
/// The object's relative path becomes its path under the root, so the
/// remote tree mirrors the local cache layout exactly.
#[derive(Debug)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Uploader for DirectoryUploader {
    fn name(&self) -> &str {
        "directory"
    }

    async fn initialize(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| UploadError::Initialize {
                message: format!("cannot create {}: {err}", self.root.display()),
            })?;
        info!(root = %self.root.display(), "directory uploader ready");
        Ok(())
    }

    async fn upload(&self, relative_path: &str, bytes: &[u8]) -> Result<(), UploadError> {
        if relative_path.split('/').any(|part| part == "..") || relative_path.starts_with('/') {
            return Err(UploadError::Rejected {
                path: relative_path.to_string(),
                message: "path escapes the upload root".to_string(),
            });
        }

        let dest = self.root.join(relative_path);
        let into_err = |source: std::io::Error| UploadError::Io {
            path: relative_path.to_string(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(into_err)?;
        }
        tokio::fs::write(&dest, bytes).await.map_err(into_err)?;
        debug!(path = relative_path, size_bytes = bytes.len(), "object mirrored");
        Ok(())
    }
}

/// The configured backend, dispatched statically.
#[derive(Debug)]
pub enum UploadBackend {
    Noop(NoopUploader),
    Directory(DirectoryUploader),
}

impl UploadBackend {
    /// Builds the backend selected by configuration.
    pub fn from_config(config: &UploaderConfig) -> Self {
        match config {
            UploaderConfig::Noop => UploadBackend::Noop(NoopUploader),
            UploaderConfig::Directory { root } => {
                UploadBackend::Directory(DirectoryUploader::new(root))
            }
        }
    }
}

impl Uploader for UploadBackend {
    fn name(&self) -> &str {
        match self {
            UploadBackend::Noop(uploader) => uploader.name(),
            UploadBackend::Directory(uploader) => uploader.name(),
        }
    }

    async fn initialize(&self) -> Result<(), UploadError> {
        match self {
            UploadBackend::Noop(uploader) => uploader.initialize().await,
            UploadBackend::Directory(uploader) => uploader.initialize().await,
        }
    }

    async fn upload(&self, relative_path: &str, bytes: &[u8]) -> Result<(), UploadError> {
        match self {
            UploadBackend::Noop(uploader) => uploader.upload(relative_path, bytes).await,
            UploadBackend::Directory(uploader) => uploader.upload(relative_path, bytes).await,
        }
    }
}
