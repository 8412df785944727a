//! Bounded upload worker pool.
//!
//! Uploads are dispatched fire-and-forget: the pipeline submits an object
//! and moves on, the pool uploads it behind a [`ConcurrencyLimiter`] so
//! outbound transfers stay within the configured width no matter how fast
//! requests arrive. Saturation queues submissions inside their tasks; it
//! never blocks the submitter.
//!
//! Failed attempts retry with doubling backoff. An object that exhausts
//! its attempts is logged and counted, nothing more: the local cache
//! already holds the file, so the mirror is repaired by a later request
//! or never.

use super::Uploader;
use crate::config::ServerConfig;
use crate::limiter::ConcurrencyLimiter;
use crate::metrics::MetricsClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Tunables for the upload pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPoolConfig {
    /// Simultaneous outbound transfers.
    pub concurrency: usize,
    /// Attempts per object before giving up.
    pub max_attempts: u32,
    /// Backoff before the second attempt. Doubles per attempt.
    pub retry_base_delay: Duration,
    /// Prefix prepended to every object path in the remote store.
    pub remote_base_path: String,
}

impl Default for UploadPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            remote_base_path: String::new(),
        }
    }
}

impl From<&ServerConfig> for UploadPoolConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            concurrency: config.uploader_concurrency.max(1),
            max_attempts: config.upload_max_retries.max(1),
            retry_base_delay: config.upload_retry_base_delay,
            remote_base_path: config.remote_base_path.clone(),
        }
    }
}

/// Drives the configured [`Uploader`] through bounded worker tasks.
pub struct UploadPool<U: Uploader> {
    uploader: Arc<U>,
    limiter: Arc<ConcurrencyLimiter>,
    config: UploadPoolConfig,
    metrics: MetricsClient,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl<U: Uploader> UploadPool<U> {
    pub fn new(uploader: U, config: UploadPoolConfig, metrics: MetricsClient) -> Self {
        Self {
            uploader: Arc::new(uploader),
            limiter: Arc::new(ConcurrencyLimiter::new(config.concurrency.max(1), "upload")),
            config,
            metrics,
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Submits one object for upload and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, relative_path: String, bytes: Vec<u8>) {
        let remote_path = self.remote_path(&relative_path);
        let uploader = Arc::clone(&self.uploader);
        let limiter = Arc::clone(&self.limiter);
        let metrics = self.metrics.clone();
        let max_attempts = self.config.max_attempts.max(1);
        let base_delay = self.config.retry_base_delay;

        self.pending.fetch_add(1, Ordering::SeqCst);
        let tracker = PendingGuard {
            pending: Arc::clone(&self.pending),
            drained: Arc::clone(&self.drained),
        };

        tokio::spawn(async move {
            let _tracker = tracker;
            let _permit = limiter.acquire().await;

            for attempt in 1..=max_attempts {
                match uploader.upload(&remote_path, &bytes).await {
                    Ok(()) => {
                        metrics.upload_completed();
                        debug!(
                            path = %remote_path,
                            backend = uploader.name(),
                            attempt,
                            "upload complete"
                        );
                        return;
                    }
                    Err(err) if attempt < max_attempts => {
                        warn!(
                            path = %remote_path,
                            backend = uploader.name(),
                            attempt,
                            error = %err,
                            "upload attempt failed, will retry"
                        );
                        let backoff = base_delay * (1u32 << (attempt - 1).min(10));
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => {
                        metrics.upload_failed();
                        error!(
                            path = %remote_path,
                            backend = uploader.name(),
                            attempts = max_attempts,
                            error = %err,
                            "upload abandoned"
                        );
                    }
                }
            }
        });
    }

    /// Waits until every submitted upload has finished or been abandoned.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Submitted uploads not yet finished, including queued ones.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Transfers currently holding a pool slot.
    pub fn active_transfers(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Most simultaneous transfers observed.
    pub fn peak_transfers(&self) -> usize {
        self.limiter.peak_in_flight()
    }

    /// The backend this pool drives.
    pub fn backend_name(&self) -> &str {
        self.uploader.name()
    }

    fn remote_path(&self, relative_path: &str) -> String {
        let prefix = self.config.remote_base_path.trim_end_matches('/');
        if prefix.is_empty() {
            relative_path.to_string()
        } else {
            format!("{prefix}/{relative_path}")
        }
    }
}

struct PendingGuard {
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}
