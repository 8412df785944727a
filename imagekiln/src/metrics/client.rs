//! Fire-and-forget metric emission.
//!
//! [`MetricsClient`] is cloneable and cheap; every component holds one.
//! Emission never blocks and never fails from the emitter's point of
//! view: if the aggregation daemon is gone, events are silently dropped.

use super::event::MetricEvent;
use tokio::sync::mpsc;

/// Handle for emitting metric events.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    tx: mpsc::UnboundedSender<MetricEvent>,
}

impl MetricsClient {
    /// Creates a client sending into the given channel.
    pub fn new(tx: mpsc::UnboundedSender<MetricEvent>) -> Self {
        Self { tx }
    }

    /// A client with no daemon behind it. Every emission is dropped.
    ///
    /// Useful for tests and one-shot tools that do not run the daemon.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Sends an event to the aggregation daemon.
    pub fn send(&self, event: MetricEvent) {
        // Fire-and-forget: a closed channel means metrics are shut down,
        // which is never a reason to fail pipeline work.
        let _ = self.tx.send(event);
    }

    pub fn request_received(&self) {
        self.send(MetricEvent::RequestReceived);
    }

    pub fn request_failed(&self) {
        self.send(MetricEvent::RequestFailed);
    }

    pub fn request_coalesced(&self) {
        self.send(MetricEvent::RequestCoalesced);
    }

    pub fn output_processed(&self, format: &str) {
        self.send(MetricEvent::OutputProcessed {
            format: format.to_string(),
        });
    }

    pub fn output_already_processed(&self, format: &str) {
        self.send(MetricEvent::OutputAlreadyProcessed {
            format: format.to_string(),
        });
    }

    pub fn output_failed(&self, format: &str) {
        self.send(MetricEvent::OutputFailed {
            format: format.to_string(),
        });
    }

    pub fn all_outputs_already_processed(&self) {
        self.send(MetricEvent::AllOutputsAlreadyProcessed);
    }

    pub fn source_downloaded(&self) {
        self.send(MetricEvent::SourceDownloaded);
    }

    pub fn source_download_skipped(&self) {
        self.send(MetricEvent::SourceDownloadSkipped);
    }

    pub fn source_unavailable(&self) {
        self.send(MetricEvent::SourceUnavailable);
    }

    pub fn upload_completed(&self) {
        self.send(MetricEvent::UploadCompleted);
    }

    pub fn upload_failed(&self) {
        self.send(MetricEvent::UploadFailed);
    }

    pub fn file_reaped(&self) {
        self.send(MetricEvent::FileReaped);
    }

    pub fn directory_pruned(&self) {
        self.send(MetricEvent::DirectoryPruned);
    }
}
