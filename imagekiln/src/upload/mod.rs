//! Remote store mirroring.
//!
//! Derived outputs are mirrored to a remote store so a rebuilt or scaled
//! replica finds them without re-deriving. Uploads are strictly
//! best-effort: they run behind the response path, retry on failure, and
//! never surface errors to the request that produced the file.
//!
//! The [`Uploader`] trait is the backend seam; [`UploadPool`] drives
//! whichever backend is configured through a bounded worker pool.

pub mod backend;
pub mod pool;

pub use backend::{DirectoryUploader, NoopUploader, UploadBackend};
pub use pool::{UploadPool, UploadPoolConfig};

use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from a single upload attempt.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload of {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {path} rejected: {message}")]
    Rejected { path: String, message: String },

    #[error("uploader initialization failed: {message}")]
    Initialize { message: String },
}

/// Which remote store to mirror into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploaderConfig {
    /// Discard uploads; the cache stays local-only.
    Noop,
    /// Mirror into a directory tree, e.g. a mounted network share.
    Directory { root: PathBuf },
}

/// Stores objects in a remote store by relative path.
pub trait Uploader: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// One-time backend setup. Runs at service startup, before any
    /// upload is dispatched; failure is fatal to startup.
    fn initialize(&self) -> impl Future<Output = Result<(), UploadError>> + Send;

    /// Stores `bytes` at `relative_path` in the remote store.
    fn upload(
        &self,
        relative_path: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), UploadError>> + Send;
}
