//! The request pipeline.
//!
//! [`Orchestrator::process`] takes one resolved variant plus any sibling
//! outputs and makes them all exist in the cache:
//!
//! 1. Re-check the cache; if everything is present, return immediately.
//! 2. Enter the [`CoalescingGate`]. Followers wait for the leader, then
//!    re-check the cache; a follower that wakes to an incomplete cache
//!    loops back as a fresh caller, a bounded number of times.
//! 3. The leader ensures the source image is cached, fetching it once if
//!    needed, then derives every missing output concurrently.
//! 4. Each derived output is persisted, then handed to the upload pool.
//!
//! Leader work runs in a spawned task, so a caller that times out and
//! drops its future abandons the wait, not the pipeline: followers are
//! still released and later requests find the cache warm.
//!
//! Failure is scoped per output. One bad derivation does not fail its
//! siblings; the call errors only when the source is unavailable, the
//! engine is down, or every requested output failed.

use crate::cache::{CacheError, CachePaths, CacheStore};
use crate::config::ServerConfig;
use crate::fetch::{FetchError, FetchOutcome, Fetcher};
use crate::gate::{CoalescingGate, GateEntry, LeaderGuard};
use crate::health::ServiceHealth;
use crate::key::CacheKey;
use crate::metrics::MetricsClient;
use crate::resolver::{self, ResolveError, VariantSpec};
use crate::transform::{TransformError, Transformer};
use crate::upload::{UploadPool, Uploader};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Why an individual output could not be derived.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One output that failed while its siblings proceeded.
#[derive(Debug)]
pub struct OutputFailure {
    pub filename: String,
    pub format: String,
    pub error: OutputError,
}

/// How a process call was satisfied.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Every requested output was already cached; no work ran.
    AlreadyProcessed,
    /// This call led the pipeline and derived all missing outputs.
    Processed { derived: usize },
    /// At least one output exists, but some failed.
    Partial {
        derived: usize,
        failures: Vec<OutputFailure>,
    },
    /// Another caller's in-flight work satisfied this request.
    Coalesced,
}

/// Errors a process call surfaces to its caller.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("format {format:?} is not allowed")]
    ForbiddenFormat { format: String },

    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] FetchError),

    #[error("transform engine is not available")]
    TransformUnavailable,

    #[error("all {failed} requested outputs failed")]
    AllOutputsFailed { failed: usize },

    #[error("gave up on key {key} after waiting out {attempts} concurrent attempts")]
    Contended { key: String, attempts: usize },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("pipeline task failed: {0}")]
    Internal(String),
}

impl ProcessError {
    /// Whether this error should surface as "not found" rather than a
    /// server fault: the request named something that does not exist or
    /// is not served, and retrying will not help.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProcessError::ForbiddenFormat { .. }
                | ProcessError::SourceUnavailable(_)
                | ProcessError::Resolve(_)
        )
    }
}

/// Runs the fetch, transform, cache, and upload pipeline.
pub struct Orchestrator<F, T, U>
where
    F: Fetcher,
    T: Transformer,
    U: Uploader,
{
    config: Arc<ServerConfig>,
    store: Arc<CacheStore>,
    gate: CoalescingGate,
    fetcher: Arc<F>,
    transformer: Arc<T>,
    uploads: Arc<UploadPool<U>>,
    metrics: MetricsClient,
    health: Arc<ServiceHealth>,
}

impl<F, T, U> Orchestrator<F, T, U>
where
    F: Fetcher,
    T: Transformer,
    U: Uploader,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<CacheStore>,
        fetcher: Arc<F>,
        transformer: Arc<T>,
        uploads: Arc<UploadPool<U>>,
        metrics: MetricsClient,
        health: Arc<ServiceHealth>,
    ) -> Self {
        Self {
            config,
            store,
            gate: CoalescingGate::new(),
            fetcher,
            transformer,
            uploads,
            metrics,
            health,
        }
    }

    /// The gate serializing pipeline work, for stats reporting.
    pub fn gate(&self) -> &CoalescingGate {
        &self.gate
    }

    /// Ensures `spec` and every named sibling output exist in the cache.
    ///
    /// `outputs` are additional variant filenames to derive from the same
    /// source while it is in hand; when empty, the configured default
    /// outputs apply. Concurrent calls for the same key coalesce: one
    /// runs the pipeline, the rest wait and re-check the cache.
    #[instrument(
        skip(self, spec, outputs),
        fields(namespace = %namespace, key = %key, filename = %spec.filename)
    )]
    pub async fn process(
        &self,
        spec: &VariantSpec,
        outputs: &[String],
        namespace: &str,
        key: &CacheKey,
    ) -> Result<ProcessOutcome, ProcessError> {
        self.metrics.request_received();
        let result = self.process_inner(spec, outputs, namespace, key).await;
        if let Err(err) = &result {
            self.metrics.request_failed();
            warn!(error = %err, "process call failed");
        }
        result
    }

    async fn process_inner(
        &self,
        spec: &VariantSpec,
        outputs: &[String],
        namespace: &str,
        key: &CacheKey,
    ) -> Result<ProcessOutcome, ProcessError> {
        if self.config.format_forbidden(&spec.format) {
            return Err(ProcessError::ForbiddenFormat {
                format: spec.format.clone(),
            });
        }

        let (specs, resolve_failures) = self.collect_outputs(spec, outputs);

        let mut attempts = 0usize;
        loop {
            // The cache, not the gate, decides whether work remains. This
            // check runs fresh on every pass so follower wakeups and
            // check-then-claim races both land on current state.
            let missing: Vec<VariantSpec> = specs
                .iter()
                .filter(|s| !self.store.contains(namespace, key, &s.filename))
                .cloned()
                .collect();

            if missing.is_empty() {
                if attempts > 0 {
                    self.metrics.request_coalesced();
                }
                return Ok(match (attempts, resolve_failures.is_empty()) {
                    (0, true) => {
                        debug!("all outputs already processed");
                        self.metrics.all_outputs_already_processed();
                        ProcessOutcome::AlreadyProcessed
                    }
                    (_, true) => ProcessOutcome::Coalesced,
                    _ => ProcessOutcome::Partial {
                        derived: 0,
                        failures: resolve_failures,
                    },
                });
            }

            match self.gate.enter(key) {
                GateEntry::Leader(guard) => {
                    return self
                        .lead(guard, &specs, missing, namespace, key, resolve_failures)
                        .await;
                }
                GateEntry::Follower(handle) => {
                    if attempts >= self.config.gate_max_reentries {
                        warn!(attempts, "cache still incomplete after repeated waits");
                        return Err(ProcessError::Contended {
                            key: key.to_string(),
                            attempts,
                        });
                    }
                    attempts += 1;
                    debug!(attempt = attempts, "waiting on in-flight pipeline work");
                    handle.released().await;
                }
            }
        }
    }

    /// Resolves the full output set for a call: the requested spec plus
    /// each named sibling, deduplicated by filename. Sibling names that
    /// do not resolve become per-output failures instead of aborting the
    /// call.
    fn collect_outputs(
        &self,
        spec: &VariantSpec,
        outputs: &[String],
    ) -> (Vec<VariantSpec>, Vec<OutputFailure>) {
        let names: &[String] = if outputs.is_empty() {
            &self.config.default_outputs
        } else {
            outputs
        };

        let mut specs = vec![spec.clone()];
        let mut failures = Vec::new();
        for name in names {
            if name.is_empty() || specs.iter().any(|s| &s.filename == name) {
                continue;
            }
            match resolver::resolve_variant(&self.config, name) {
                Ok(resolved) => specs.push(resolved),
                Err(err) => {
                    warn!(output = %name, error = %err, "sibling output does not resolve");
                    self.metrics.output_failed("unknown");
                    failures.push(OutputFailure {
                        filename: name.clone(),
                        format: String::new(),
                        error: err.into(),
                    });
                }
            }
        }
        (specs, failures)
    }

    /// Runs the pipeline as leader. The work itself is spawned so it
    /// survives this caller being dropped; the gate guard travels into
    /// the task and releases followers when the task finishes, however
    /// it finishes.
    async fn lead(
        &self,
        guard: LeaderGuard,
        specs: &[VariantSpec],
        missing: Vec<VariantSpec>,
        namespace: &str,
        key: &CacheKey,
        earlier_failures: Vec<OutputFailure>,
    ) -> Result<ProcessOutcome, ProcessError> {
        for present in specs.iter().filter(|s| {
            !missing.iter().any(|m| m.filename == s.filename)
        }) {
            debug!(filename = %present.filename, "output already processed");
            self.metrics.output_already_processed(&present.format);
        }

        let job = PipelineJob {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            fetcher: Arc::clone(&self.fetcher),
            transformer: Arc::clone(&self.transformer),
            uploads: Arc::clone(&self.uploads),
            metrics: self.metrics.clone(),
            health: Arc::clone(&self.health),
            namespace: namespace.to_string(),
            key: key.clone(),
            missing,
        };

        let handle = tokio::spawn(async move {
            let result = job.run().await;
            // Followers wake only after results are on disk.
            drop(guard);
            result
        });

        match handle.await {
            Ok(Ok(outcome)) => Ok(merge_failures(outcome, earlier_failures)),
            Ok(Err(err)) => Err(err),
            Err(join_err) => {
                error!(error = %join_err, "pipeline task panicked");
                Err(ProcessError::Internal(join_err.to_string()))
            }
        }
    }
}

/// Everything one leader run needs, owned so the task outlives its
/// caller.
struct PipelineJob<F, T, U>
where
    F: Fetcher,
    T: Transformer,
    U: Uploader,
{
    config: Arc<ServerConfig>,
    store: Arc<CacheStore>,
    fetcher: Arc<F>,
    transformer: Arc<T>,
    uploads: Arc<UploadPool<U>>,
    metrics: MetricsClient,
    health: Arc<ServiceHealth>,
    namespace: String,
    key: CacheKey,
    missing: Vec<VariantSpec>,
}

impl<F, T, U> PipelineJob<F, T, U>
where
    F: Fetcher,
    T: Transformer,
    U: Uploader,
{
    async fn run(self) -> Result<ProcessOutcome, ProcessError> {
        let source = self.ensure_source().await?;

        let needs_engine = self.missing.iter().any(|s| !s.is_passthrough());
        if needs_engine && !self.transformer.is_available() {
            self.health.set_transformer_available(false);
            return Err(ProcessError::TransformUnavailable);
        }

        let derivations = self
            .missing
            .iter()
            .map(|spec| self.derive_output(&source, spec));
        let results = join_all(derivations).await;

        let mut derived = 0usize;
        let mut failures = Vec::new();
        for (spec, result) in self.missing.iter().zip(results) {
            match result {
                Ok(()) => derived += 1,
                Err(err) => {
                    if matches!(err, OutputError::Transform(TransformError::EngineUnavailable)) {
                        // The engine disappeared mid-run; degrade, but
                        // sibling outputs that made it stay cached.
                        self.health.set_transformer_available(false);
                    }
                    failures.push(OutputFailure {
                        filename: spec.filename.clone(),
                        format: spec.format.clone(),
                        error: err,
                    });
                }
            }
        }

        if derived == 0 && !failures.is_empty() {
            return Err(ProcessError::AllOutputsFailed {
                failed: failures.len(),
            });
        }

        info!(
            namespace = %self.namespace,
            key = %self.key,
            derived,
            failed = failures.len(),
            "pipeline run complete"
        );
        Ok(if failures.is_empty() {
            ProcessOutcome::Processed { derived }
        } else {
            ProcessOutcome::Partial { derived, failures }
        })
    }

    /// Reads the cached source or fetches it from the origin, exactly
    /// once per leader run.
    async fn ensure_source(&self) -> Result<Arc<Vec<u8>>, ProcessError> {
        if let Some(bytes) = self.store.read_source(&self.namespace, &self.key) {
            debug!("source already cached");
            self.metrics.source_download_skipped();
            return Ok(Arc::new(bytes));
        }

        let url = self.source_url();
        match self.fetcher.fetch(&url).await {
            Ok(FetchOutcome::Downloaded(bytes)) => {
                self.store
                    .write_source(&self.namespace, &self.key, &bytes)?;
                self.metrics.source_downloaded();
                info!(url = %url, size_bytes = bytes.len(), "source downloaded");
                Ok(Arc::new(bytes))
            }
            Ok(FetchOutcome::AlreadyPresent) => {
                self.metrics.source_download_skipped();
                match self.store.read_source(&self.namespace, &self.key) {
                    Some(bytes) => Ok(Arc::new(bytes)),
                    None => Err(ProcessError::SourceUnavailable(FetchError::Transport {
                        url,
                        message: "fetcher reported the source present but the cache misses"
                            .to_string(),
                    })),
                }
            }
            Err(err) => {
                self.metrics.source_unavailable();
                warn!(url = %url, error = %err, "source unavailable");
                Err(ProcessError::SourceUnavailable(err))
            }
        }
    }

    /// Derives, persists, and submits one output for upload.
    async fn derive_output(&self, source: &[u8], spec: &VariantSpec) -> Result<(), OutputError> {
        let bytes = if spec.is_passthrough() {
            source.to_vec()
        } else {
            let render = render_spec(spec, self.config.maximum_width);
            match self.transformer.transform(source, &render).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.metrics.output_failed(&spec.format);
                    warn!(filename = %spec.filename, error = %err, "output derivation failed");
                    return Err(err.into());
                }
            }
        };

        if let Err(err) = self
            .store
            .write(&self.namespace, &self.key, &spec.filename, &bytes)
        {
            self.metrics.output_failed(&spec.format);
            warn!(filename = %spec.filename, error = %err, "output persist failed");
            return Err(err.into());
        }
        self.metrics.output_processed(&spec.format);
        debug!(filename = %spec.filename, size_bytes = bytes.len(), "output derived");

        self.uploads.submit(
            CachePaths::relative_path(&self.namespace, &self.key, &spec.filename),
            bytes,
        );
        Ok(())
    }

    fn source_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.remote_base_url.trim_end_matches('/'),
            CachePaths::relative_source_path(&self.namespace, &self.key)
        )
    }
}

/// Caps the rendered width without touching the cached filename.
fn render_spec(spec: &VariantSpec, maximum_width: u32) -> VariantSpec {
    let mut render = spec.clone();
    render.width = spec.clamped_width(maximum_width);
    render
}

fn merge_failures(outcome: ProcessOutcome, mut earlier: Vec<OutputFailure>) -> ProcessOutcome {
    if earlier.is_empty() {
        return outcome;
    }
    match outcome {
        ProcessOutcome::Processed { derived } => ProcessOutcome::Partial {
            derived,
            failures: earlier,
        },
        ProcessOutcome::Partial {
            derived,
            mut failures,
        } => {
            failures.append(&mut earlier);
            ProcessOutcome::Partial { derived, failures }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_variant;
    use crate::upload::{UploadError, UploadPoolConfig};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockFetcher {
        bytes: Vec<u8>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        fn serving(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.to_vec(),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn unavailable() -> Self {
            Self {
                bytes: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Fetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FetchError::NotFound {
                    url: url.to_string(),
                })
            } else {
                Ok(FetchOutcome::Downloaded(self.bytes.clone()))
            }
        }
    }

    struct MockTransformer {
        available: AtomicBool,
        fail_filenames: HashSet<String>,
        calls: AtomicUsize,
    }

    impl MockTransformer {
        fn working() -> Self {
            Self {
                available: AtomicBool::new(true),
                fail_filenames: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn offline() -> Self {
            let transformer = Self::working();
            transformer.available.store(false, Ordering::Relaxed);
            transformer
        }

        fn failing_for(filenames: &[&str]) -> Self {
            Self {
                available: AtomicBool::new(true),
                fail_filenames: filenames.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Transformer for MockTransformer {
        async fn transform(
            &self,
            source: &[u8],
            spec: &VariantSpec,
        ) -> Result<Vec<u8>, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_filenames.contains(&spec.filename) {
                return Err(TransformError::Failed {
                    filename: spec.filename.clone(),
                    message: "injected failure".to_string(),
                });
            }
            Ok(format!("{}|{}x{}|{}", spec.filename, spec.width, spec.height, source.len())
                .into_bytes())
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::Relaxed)
        }
    }

    struct RecordingUploader {
        uploaded: Mutex<Vec<String>>,
    }

    impl RecordingUploader {
        fn new() -> Self {
            Self {
                uploaded: Mutex::new(Vec::new()),
            }
        }
    }

    impl Uploader for Arc<RecordingUploader> {
        fn name(&self) -> &str {
            "recording"
        }

        async fn initialize(&self) -> Result<(), UploadError> {
            Ok(())
        }

        async fn upload(&self, relative_path: &str, _bytes: &[u8]) -> Result<(), UploadError> {
            self.uploaded.lock().unwrap().push(relative_path.to_string());
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        config: Arc<ServerConfig>,
        store: Arc<CacheStore>,
        health: Arc<ServiceHealth>,
        uploader: Arc<RecordingUploader>,
        orchestrator:
            Orchestrator<MockFetcher, MockTransformer, Arc<RecordingUploader>>,
    }

    fn harness(fetcher: MockFetcher, transformer: MockTransformer) -> Harness {
        harness_with(ServerConfig::default(), fetcher, transformer)
    }

    fn harness_with(
        mut base: ServerConfig,
        fetcher: MockFetcher,
        transformer: MockTransformer,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        base.local_base_path = dir.path().to_path_buf();
        base.remote_base_url = "http://origin.test".to_string();
        let config = Arc::new(base);
        let store = Arc::new(CacheStore::open(dir.path()).unwrap());
        let health = Arc::new(ServiceHealth::new(transformer.is_available()));
        let uploader = Arc::new(RecordingUploader::new());
        let uploads = Arc::new(UploadPool::new(
            Arc::clone(&uploader),
            UploadPoolConfig::default(),
            MetricsClient::disconnected(),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::new(fetcher),
            Arc::new(transformer),
            Arc::clone(&uploads),
            MetricsClient::disconnected(),
            Arc::clone(&health),
        );
        Harness {
            _dir: dir,
            config,
            store,
            health,
            uploader,
            orchestrator,
        }
    }

    fn key() -> CacheKey {
        CacheKey::derive("products", ["42", "", "", ""])
    }

    fn spec_for(h: &Harness, filename: &str) -> VariantSpec {
        resolve_variant(&h.config, filename).unwrap()
    }

    #[tokio::test]
    async fn test_derives_requested_and_sibling_outputs() {
        let h = harness(MockFetcher::serving(b"source image"), MockTransformer::working());
        let spec = spec_for(&h, "x300.jpg");

        let outcome = h
            .orchestrator
            .process(&spec, &["x300.webp".to_string()], "products", &key())
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Processed { derived: 2 }));
        assert!(h.store.contains("products", &key(), "x300.jpg"));
        assert!(h.store.contains("products", &key(), "x300.webp"));
        assert!(h.store.has_source("products", &key()));
    }

    #[tokio::test]
    async fn test_source_is_fetched_exactly_once_per_run() {
        let h = harness(MockFetcher::serving(b"source image"), MockTransformer::working());
        let spec = spec_for(&h, "x300.jpg");

        h.orchestrator
            .process(
                &spec,
                &["x300.webp".to_string(), "w100.gif".to_string()],
                "products",
                &key(),
            )
            .await
            .unwrap();

        assert_eq!(h.orchestrator.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.transformer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_repeat_call_is_already_processed() {
        let h = harness(MockFetcher::serving(b"source image"), MockTransformer::working());
        let spec = spec_for(&h, "x300.jpg");

        h.orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::AlreadyProcessed));
        assert_eq!(h.orchestrator.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.transformer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_source_skips_fetch() {
        let h = harness(MockFetcher::serving(b"ignored"), MockTransformer::working());
        h.store
            .write_source("products", &key(), b"pre-seeded source")
            .unwrap();
        let spec = spec_for(&h, "x300.jpg");

        h.orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap();

        assert_eq!(h.orchestrator.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forbidden_format_rejects_before_any_work() {
        let h = harness_with(
            ServerConfig::default().with_allowed_formats(["jpg", "gif", "webp"]),
            MockFetcher::serving(b"source image"),
            MockTransformer::working(),
        );
        let spec = spec_for(&h, "x100.png");

        let err = h
            .orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::ForbiddenFormat { .. }));
        assert!(err.is_not_found());
        assert_eq!(h.orchestrator.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(!h.store.contains("products", &key(), "x100.png"));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let h = harness(MockFetcher::unavailable(), MockTransformer::working());
        let spec = spec_for(&h, "x300.jpg");

        let err = h
            .orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::SourceUnavailable(_)));
        assert!(err.is_not_found());
        assert!(!h.store.has_source("products", &key()));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successful_outputs() {
        let h = harness(
            MockFetcher::serving(b"source image"),
            MockTransformer::failing_for(&["x300.webp"]),
        );
        let spec = spec_for(&h, "x300.jpg");

        let outcome = h
            .orchestrator
            .process(&spec, &["x300.webp".to_string()], "products", &key())
            .await
            .unwrap();

        match outcome {
            ProcessOutcome::Partial { derived, failures } => {
                assert_eq!(derived, 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].filename, "x300.webp");
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
        assert!(h.store.contains("products", &key(), "x300.jpg"));
        assert!(!h.store.contains("products", &key(), "x300.webp"));
    }

    #[tokio::test]
    async fn test_every_output_failing_is_an_error() {
        let h = harness(
            MockFetcher::serving(b"source image"),
            MockTransformer::failing_for(&["x300.jpg", "x300.webp"]),
        );
        let spec = spec_for(&h, "x300.jpg");

        let err = h
            .orchestrator
            .process(&spec, &["x300.webp".to_string()], "products", &key())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::AllOutputsFailed { failed: 2 }));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_passthrough_copies_source_without_engine() {
        let h = harness(MockFetcher::serving(b"original bytes"), MockTransformer::working());
        let spec = spec_for(&h, "original.png");
        assert!(spec.is_passthrough());

        let outcome = h
            .orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Processed { derived: 1 }));
        assert_eq!(
            h.store.read("products", &key(), "original.png").unwrap(),
            b"original bytes"
        );
        assert_eq!(h.orchestrator.transformer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offline_engine_degrades_service() {
        let h = harness(MockFetcher::serving(b"source image"), MockTransformer::offline());
        let spec = spec_for(&h, "x300.jpg");

        let err = h
            .orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::TransformUnavailable));
        assert!(!err.is_not_found());
        assert!(!h.health.transformer_available());
    }

    #[tokio::test]
    async fn test_unresolvable_sibling_fails_alone() {
        let h = harness(MockFetcher::serving(b"source image"), MockTransformer::working());
        let spec = spec_for(&h, "x300.jpg");

        let outcome = h
            .orchestrator
            .process(
                &spec,
                &["noextension".to_string(), "x300.webp".to_string()],
                "products",
                &key(),
            )
            .await
            .unwrap();

        match outcome {
            ProcessOutcome::Partial { derived, failures } => {
                assert_eq!(derived, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].filename, "noextension");
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
        assert!(h.store.contains("products", &key(), "x300.webp"));
    }

    #[tokio::test]
    async fn test_default_outputs_apply_when_none_named() {
        let h = harness_with(
            ServerConfig::default().with_default_outputs(["x100.jpg"]),
            MockFetcher::serving(b"source image"),
            MockTransformer::working(),
        );
        let spec = spec_for(&h, "x300.jpg");

        let outcome = h
            .orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Processed { derived: 2 }));
        assert!(h.store.contains("products", &key(), "x100.jpg"));
    }

    #[tokio::test]
    async fn test_rendered_width_is_clamped_but_filename_kept() {
        let h = harness_with(
            ServerConfig::default().with_maximum_width(500),
            MockFetcher::serving(b"source image"),
            MockTransformer::working(),
        );
        let spec = spec_for(&h, "2000x100.jpg");

        h.orchestrator
            .process(&spec, &[], "products", &key())
            .await
            .unwrap();

        // The mock echoes the dimensions it was asked to render.
        let cached = h.store.read("products", &key(), "2000x100.jpg").unwrap();
        let cached = String::from_utf8(cached).unwrap();
        assert!(cached.contains("|500x100|"), "got {cached}");
    }

    #[tokio::test]
    async fn test_outputs_are_submitted_for_upload() {
        let h = harness(MockFetcher::serving(b"source image"), MockTransformer::working());
        let spec = spec_for(&h, "x300.jpg");

        h.orchestrator
            .process(&spec, &["x300.webp".to_string()], "products", &key())
            .await
            .unwrap();
        h.orchestrator.uploads.drain().await;

        let mut uploaded = h.uploader.uploaded.lock().unwrap().clone();
        uploaded.sort();
        assert_eq!(
            uploaded,
            vec![
                "products/products42/x300.jpg".to_string(),
                "products/products42/x300.webp".to_string(),
            ]
        );
    }
}
