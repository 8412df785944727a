//! Metric aggregation daemon.
//!
//! Receives [`MetricEvent`]s from every [`MetricsClient`] clone and folds
//! them into a [`MetricsSnapshot`]. Runs as an independent task so
//! emitters never contend with aggregation.

use super::client::MetricsClient;
use super::event::MetricEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Aggregated counters for every metric event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_received: u64,
    pub requests_failed: u64,
    pub requests_coalesced: u64,
    pub outputs_processed: u64,
    pub outputs_already_processed: u64,
    pub outputs_failed: u64,
    pub all_outputs_already_processed: u64,
    pub sources_downloaded: u64,
    pub source_downloads_skipped: u64,
    pub sources_unavailable: u64,
    pub uploads_completed: u64,
    pub uploads_failed: u64,
    pub files_reaped: u64,
    pub directories_pruned: u64,
    /// Outputs derived, keyed by format.
    pub outputs_processed_by_format: HashMap<String, u64>,
}

/// Aggregates metric events until shut down.
pub struct MetricsDaemon {
    rx: mpsc::UnboundedReceiver<MetricEvent>,
    state: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsDaemon {
    /// Creates the daemon and a client feeding it.
    pub fn new() -> (Self, MetricsClient) {
        let (tx, rx) = mpsc::unbounded_channel();
        let daemon = Self {
            rx,
            state: Arc::new(Mutex::new(MetricsSnapshot::default())),
        };
        (daemon, MetricsClient::new(tx))
    }

    /// Shared handle to the aggregated state, readable while the daemon
    /// runs and after it stops.
    pub fn state_handle(&self) -> Arc<Mutex<MetricsSnapshot>> {
        Arc::clone(&self.state)
    }

    /// Runs until cancelled or until every client is dropped.
    ///
    /// Events already queued when shutdown fires are drained first, so a
    /// snapshot taken after `run` returns reflects everything emitted
    /// before the cancellation.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                event = self.rx.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
            }
        }

        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
        }
        debug!("metrics daemon stopped");
    }

    fn apply(&self, event: MetricEvent) {
        let mut state = self.state.lock().unwrap();
        match event {
            MetricEvent::RequestReceived => state.requests_received += 1,
            MetricEvent::RequestFailed => state.requests_failed += 1,
            MetricEvent::RequestCoalesced => state.requests_coalesced += 1,
            MetricEvent::OutputProcessed { format } => {
                state.outputs_processed += 1;
                *state
                    .outputs_processed_by_format
                    .entry(format)
                    .or_insert(0) += 1;
            }
            MetricEvent::OutputAlreadyProcessed { .. } => state.outputs_already_processed += 1,
            MetricEvent::OutputFailed { .. } => state.outputs_failed += 1,
            MetricEvent::AllOutputsAlreadyProcessed => state.all_outputs_already_processed += 1,
            MetricEvent::SourceDownloaded => state.sources_downloaded += 1,
            MetricEvent::SourceDownloadSkipped => state.source_downloads_skipped += 1,
            MetricEvent::SourceUnavailable => state.sources_unavailable += 1,
            MetricEvent::UploadCompleted => state.uploads_completed += 1,
            MetricEvent::UploadFailed => state.uploads_failed += 1,
            MetricEvent::FileReaped => state.files_reaped += 1,
            MetricEvent::DirectoryPruned => state.directories_pruned += 1,
        }
    }
}
