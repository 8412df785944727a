//! Metrics collection and reporting.
//!
//! Two layers, joined by an unbounded channel:
//!
//! 1. **Emission** ([`MetricsClient`]) - cloneable, fire-and-forget. Held
//!    by the orchestrator, the upload pool, and the reaper.
//! 2. **Aggregation** ([`MetricsDaemon`]) - an independent task folding
//!    events into a [`MetricsSnapshot`] that health endpoints and
//!    shutdown reports read.
//!
//! [`MetricsSystem`] wires the two together and owns the daemon task.

pub mod client;
pub mod daemon;
pub mod event;

pub use client::MetricsClient;
pub use daemon::{MetricsDaemon, MetricsSnapshot};
pub use event::MetricEvent;

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Owns the aggregation daemon and hands out emission clients.
pub struct MetricsSystem {
    client: MetricsClient,
    state: Arc<Mutex<MetricsSnapshot>>,
    shutdown: CancellationToken,
    daemon_handle: Option<JoinHandle<()>>,
}

impl MetricsSystem {
    /// Starts the aggregation daemon. Must be called from within a tokio
    /// runtime.
    pub fn start() -> Self {
        let (daemon, client) = MetricsDaemon::new();
        let state = daemon.state_handle();
        let shutdown = CancellationToken::new();
        let daemon_shutdown = shutdown.clone();
        let daemon_handle = Some(tokio::spawn(async move {
            daemon.run(daemon_shutdown).await;
        }));

        Self {
            client,
            state,
            shutdown,
            daemon_handle,
        }
    }

    /// A client for emitting events into this system.
    pub fn client(&self) -> MetricsClient {
        self.client.clone()
    }

    /// The counters as of now. Events still in the channel are not yet
    /// reflected; use [`MetricsSystem::shutdown`] for a settled view.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().unwrap().clone()
    }

    /// Stops the daemon, drains queued events, and returns the final
    /// counters.
    pub async fn shutdown(mut self) -> MetricsSnapshot {
        self.shutdown.cancel();
        if let Some(handle) = self.daemon_handle.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "metrics daemon task panicked");
            }
        }
        self.state.lock().unwrap().clone()
    }
}
