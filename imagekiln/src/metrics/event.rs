//! Metric event definitions.
//!
//! Every observable branch of the pipeline emits exactly one event.
//! Events are cheap to construct and cross a channel to the aggregation
//! daemon, so emitters never block on metrics.

/// One observable pipeline branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    /// A process call was accepted.
    RequestReceived,
    /// A process call returned an error.
    RequestFailed,
    /// A process call was satisfied by waiting on another caller's work.
    RequestCoalesced,
    /// One output was derived and cached.
    OutputProcessed { format: String },
    /// One requested output was already cached.
    OutputAlreadyProcessed { format: String },
    /// One output failed to derive.
    OutputFailed { format: String },
    /// Every requested output was already cached; no work ran.
    AllOutputsAlreadyProcessed,
    /// A source image was fetched from the origin.
    SourceDownloaded,
    /// A source fetch was skipped because the source was already cached.
    SourceDownloadSkipped,
    /// The origin could not supply the source image.
    SourceUnavailable,
    /// One output was mirrored to the remote store.
    UploadCompleted,
    /// An upload exhausted its retries.
    UploadFailed,
    /// The reaper deleted an expired cache file.
    FileReaped,
    /// The reaper pruned an empty cache directory.
    DirectoryPruned,
}
