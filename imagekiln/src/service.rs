//! Service facade wiring every subsystem together.
//!
//! [`ImageKilnService::start`] builds the cache store, origin fetcher,
//! transform engine, upload pool, metrics daemon, and cache reaper from
//! one [`ServerConfig`], and [`ImageKilnService::process_request`] is the
//! single entry point request handlers call. Shutdown stops the reaper,
//! drains pending uploads, and returns the final metrics snapshot.

use crate::cache::{CacheError, CacheStore};
use crate::config::ServerConfig;
use crate::fetch::{FetchError, Fetcher, HttpFetcher};
use crate::gate::GateStats;
use crate::health::{HealthSnapshot, ServiceHealth};
use crate::key::CacheKey;
use crate::metrics::{MetricsSnapshot, MetricsSystem};
use crate::orchestrator::{Orchestrator, ProcessError, ProcessOutcome};
use crate::reaper::CacheReaper;
use crate::resolver;
use crate::transform::{CommandTransformer, Transformer, DEFAULT_ENGINE};
use crate::upload::{UploadBackend, UploadError, UploadPool, UploadPoolConfig, Uploader};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that prevent the service from starting.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cache store unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("origin fetcher failed to build: {0}")]
    Fetcher(#[from] FetchError),

    #[error("uploader failed to initialize: {0}")]
    Uploader(#[from] UploadError),
}

/// A satisfied process request: how it was satisfied and where the
/// requested variant now lives on local disk, ready to serve.
#[derive(Debug)]
pub struct ProcessedImage {
    pub outcome: ProcessOutcome,
    pub local_path: PathBuf,
}

type ServiceOrchestrator = Orchestrator<HttpFetcher, CommandTransformer, UploadBackend>;

/// The assembled image processing service.
pub struct ImageKilnService {
    config: Arc<ServerConfig>,
    store: Arc<CacheStore>,
    orchestrator: ServiceOrchestrator,
    uploads: Arc<UploadPool<UploadBackend>>,
    metrics: MetricsSystem,
    health: Arc<ServiceHealth>,
    reaper_shutdown: CancellationToken,
    reaper_handle: JoinHandle<()>,
}

impl ImageKilnService {
    /// Builds every subsystem and starts the background daemons.
    ///
    /// Fails when the cache root cannot be created, the HTTP client
    /// cannot be built, or the upload backend rejects initialization. A
    /// missing transform engine is not fatal: the service starts
    /// degraded and still serves passthrough and already-cached work.
    pub async fn start(config: ServerConfig) -> Result<Self, ServiceError> {
        let config = Arc::new(config);
        let store = Arc::new(CacheStore::open(config.local_base_path())?);

        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
        let transformer = Arc::new(CommandTransformer::new(
            DEFAULT_ENGINE,
            config.transform_concurrency,
        ));
        if !transformer.is_available() {
            warn!(
                engine = DEFAULT_ENGINE,
                "transform engine not found, starting degraded"
            );
        }
        let health = Arc::new(ServiceHealth::new(transformer.is_available()));

        let backend = UploadBackend::from_config(&config.uploader);
        backend.initialize().await?;

        let metrics = MetricsSystem::start();
        let uploads = Arc::new(UploadPool::new(
            backend,
            UploadPoolConfig::from(config.as_ref()),
            metrics.client(),
        ));

        let orchestrator = Orchestrator::new(
            Arc::clone(&config),
            Arc::clone(&store),
            fetcher,
            transformer,
            Arc::clone(&uploads),
            metrics.client(),
            Arc::clone(&health),
        );

        let reaper_shutdown = CancellationToken::new();
        let reaper = CacheReaper::new(
            store.root(),
            config.retention_age,
            config.reaper_interval,
            metrics.client(),
        );
        let reaper_handle = tokio::spawn(reaper.run(reaper_shutdown.clone()));

        info!(
            version = crate::VERSION,
            cache_root = %store.root().display(),
            remote_base_url = %config.remote_base_url,
            uploader = uploads.backend_name(),
            transformer_available = health.transformer_available(),
            "imagekiln service started"
        );

        Ok(Self {
            config,
            store,
            orchestrator,
            uploads,
            metrics,
            health,
            reaper_shutdown,
            reaper_handle,
        })
    }

    /// Resolves `filename` under the cache key derived from `namespace`
    /// and `segments`, runs the pipeline, and returns the local path of
    /// the requested variant.
    ///
    /// `outputs` names sibling variants to derive in the same run; when
    /// empty, the configured defaults apply.
    pub async fn process_request(
        &self,
        namespace: &str,
        segments: [&str; 4],
        filename: &str,
        outputs: &[String],
    ) -> Result<ProcessedImage, ProcessError> {
        let key = CacheKey::derive(namespace, segments);
        self.process_keyed(namespace, &key, filename, outputs).await
    }

    /// Same as [`process_request`](Self::process_request), but for a
    /// caller that already holds a cache key.
    pub async fn process_keyed(
        &self,
        namespace: &str,
        key: &CacheKey,
        filename: &str,
        outputs: &[String],
    ) -> Result<ProcessedImage, ProcessError> {
        let spec = resolver::resolve_variant(&self.config, filename)?;

        let outcome = self
            .orchestrator
            .process(&spec, outputs, namespace, key)
            .await?;

        Ok(ProcessedImage {
            local_path: self.store.paths().local_path(namespace, key, filename),
            outcome,
        })
    }

    /// Stages `bytes` as the cached source for `key`, replacing any
    /// previous source. Later pipeline runs for the key skip the origin
    /// fetch entirely.
    pub fn seed_source(
        &self,
        namespace: &str,
        key: &CacheKey,
        bytes: &[u8],
    ) -> Result<(), CacheError> {
        self.store.write_source(namespace, key, bytes)?;
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current liveness and degradation state.
    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Counters aggregated since startup.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Request coalescing counters from the pipeline gate.
    pub fn gate_stats(&self) -> GateStats {
        self.orchestrator.gate().stats()
    }

    /// Stops the daemons, drains pending uploads, and returns the final
    /// metrics snapshot.
    pub async fn shutdown(self) -> MetricsSnapshot {
        info!("imagekiln service shutting down");
        self.health.begin_shutdown();

        self.reaper_shutdown.cancel();
        if let Err(err) = self.reaper_handle.await {
            warn!(error = %err, "cache reaper did not stop cleanly");
        }

        self.uploads.drain().await;

        let snapshot = self.metrics.shutdown().await;
        info!(
            requests_received = snapshot.requests_received,
            outputs_processed = snapshot.outputs_processed,
            uploads_completed = snapshot.uploads_completed,
            "imagekiln service stopped"
        );
        snapshot
    }
}
