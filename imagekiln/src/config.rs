//! Server configuration.
//!
//! [`ServerConfig`] carries every tunable the service reads at runtime:
//! cache locations, the source origin, transformation limits, uploader
//! selection, and the background reaper schedule. Construct one with
//! [`ServerConfig::default`] and override fields with the `with_*` builders.

use crate::upload::UploaderConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for the image service.
///
/// Defaults match a small origin deployment: quality 75, width capped at
/// 1000 pixels, four concurrent transforms, ten concurrent uploads, and a
/// cache reaped every two minutes with a thirty minute retention age.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Formats the service will derive. Empty means every format is allowed.
    pub allowed_formats: Vec<String>,
    /// Upper bound applied to requested widths. Zero disables the cap.
    pub maximum_width: u32,
    /// Quality substituted when a variant filename does not carry one.
    pub default_quality: u8,
    /// Root directory of the local cache.
    pub local_base_path: PathBuf,
    /// Base URL source images are fetched from.
    pub remote_base_url: String,
    /// Path prefix applied to uploads in the remote store.
    pub remote_base_path: String,
    /// Which remote store uploads go to.
    pub uploader: UploaderConfig,
    /// Simultaneous outbound transfers the upload pool allows.
    pub uploader_concurrency: usize,
    /// Upload attempts per output before giving up.
    pub upload_max_retries: u32,
    /// Backoff before the first upload retry. Doubles per attempt.
    pub upload_retry_base_delay: Duration,
    /// Simultaneous transform engine invocations.
    pub transform_concurrency: usize,
    /// Timeout applied to each outbound source fetch.
    pub fetch_timeout: Duration,
    /// Age beyond which cached files are deleted by the reaper.
    pub retention_age: Duration,
    /// How often the reaper sweeps the cache root.
    pub reaper_interval: Duration,
    /// Outputs derived when a process call names none.
    pub default_outputs: Vec<String>,
    /// Times a coalesced caller may wake to an incomplete cache and retry
    /// before giving up.
    pub gate_max_reentries: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_formats: Vec::new(),
            maximum_width: 1000,
            default_quality: 75,
            local_base_path: PathBuf::from("public"),
            remote_base_url: String::new(),
            remote_base_path: String::new(),
            uploader: UploaderConfig::Noop,
            uploader_concurrency: 10,
            upload_max_retries: 3,
            upload_retry_base_delay: Duration::from_millis(500),
            transform_concurrency: 4,
            fetch_timeout: Duration::from_secs(5),
            retention_age: Duration::from_secs(30 * 60),
            reaper_interval: Duration::from_secs(2 * 60),
            default_outputs: Vec::new(),
            gate_max_reentries: 2,
        }
    }
}

impl ServerConfig {
    /// Set the allowed output formats from anything yielding string-likes.
    pub fn with_allowed_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Set the maximum rendered width.
    pub fn with_maximum_width(mut self, width: u32) -> Self {
        self.maximum_width = width;
        self
    }

    /// Set the quality used when a filename omits one.
    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.default_quality = quality;
        self
    }

    /// Set the local cache root.
    pub fn with_local_base_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.local_base_path = path.into();
        self
    }

    /// Set the origin base URL sources are fetched from.
    pub fn with_remote_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.remote_base_url = url.into();
        self
    }

    /// Set the remote store path prefix.
    pub fn with_remote_base_path<S: Into<String>>(mut self, path: S) -> Self {
        self.remote_base_path = path.into();
        self
    }

    /// Select the upload backend.
    pub fn with_uploader(mut self, uploader: UploaderConfig) -> Self {
        self.uploader = uploader;
        self
    }

    /// Set the upload pool width.
    pub fn with_uploader_concurrency(mut self, concurrency: usize) -> Self {
        self.uploader_concurrency = concurrency;
        self
    }

    /// Set the transform engine concurrency.
    pub fn with_transform_concurrency(mut self, concurrency: usize) -> Self {
        self.transform_concurrency = concurrency;
        self
    }

    /// Set the outbound fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the cache retention age.
    pub fn with_retention_age(mut self, age: Duration) -> Self {
        self.retention_age = age;
        self
    }

    /// Set the reaper sweep interval.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the outputs derived when a request names none.
    pub fn with_default_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Set how many times a waiting request may re-check the cache before
    /// giving up on concurrent work.
    pub fn with_gate_max_reentries(mut self, max_reentries: usize) -> Self {
        self.gate_max_reentries = max_reentries;
        self
    }

    /// Whether `format` is outside the configured allow-list.
    ///
    /// An empty format or an empty allow-list forbids nothing; policy for
    /// unparseable names lives with the resolver, not here.
    pub fn format_forbidden(&self, format: &str) -> bool {
        if format.is_empty() || self.allowed_formats.is_empty() {
            return false;
        }
        !self.allowed_formats.iter().any(|allowed| allowed == format)
    }

    /// The local cache root as a borrowed path.
    pub fn local_base_path(&self) -> &Path {
        &self.local_base_path
    }
}
