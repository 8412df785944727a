//! Image transformation.
//!
//! The [`Transformer`] trait is the seam between the pipeline and
//! whatever renders pixels. The production implementation,
//! [`CommandTransformer`], shells out to an ImageMagick-style binary:
//! source bytes in on stdin, derived bytes out on stdout. Child processes
//! are bounded by a [`ConcurrencyLimiter`] so a request burst cannot fork
//! without limit.
//!
//! Availability is probed at construction and re-checked on spawn
//! failures. A missing engine degrades the whole service rather than
//! failing one request at a time, so the flag is surfaced through
//! [`Transformer::is_available`].

use crate::limiter::ConcurrencyLimiter;
use crate::resolver::VariantSpec;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default transform engine binary.
pub const DEFAULT_ENGINE: &str = "convert";

/// Errors from deriving one output.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The engine binary cannot be invoked at all. Service-degrading.
    #[error("transform engine is not available")]
    EngineUnavailable,

    /// The engine ran and rejected this derivation. Scoped to one output.
    #[error("transform of {filename} failed: {message}")]
    Failed { filename: String, message: String },

    #[error("transform engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Derives output images from source bytes.
pub trait Transformer: Send + Sync + 'static {
    /// Renders `spec` from `source`, returning the encoded output bytes.
    fn transform(
        &self,
        source: &[u8],
        spec: &VariantSpec,
    ) -> impl Future<Output = Result<Vec<u8>, TransformError>> + Send;

    /// Whether the engine can currently be invoked.
    fn is_available(&self) -> bool;
}

/// Transformer shelling out to an external engine binary.
#[derive(Debug)]
pub struct CommandTransformer {
    program: String,
    available: AtomicBool,
    limiter: ConcurrencyLimiter,
}

impl CommandTransformer {
    /// Creates a transformer for `program`, probing whether the binary
    /// can be invoked.
    pub fn new(program: impl Into<String>, concurrency: usize) -> Self {
        let program = program.into();
        let available = probe_engine(&program);
        if !available {
            warn!(program = %program, "transform engine not found, service will be degraded");
        }
        Self {
            program,
            available: AtomicBool::new(available),
            limiter: ConcurrencyLimiter::new(concurrency.max(1), "transform"),
        }
    }

    /// The engine binary this transformer invokes.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Transformer for CommandTransformer {
    async fn transform(&self, source: &[u8], spec: &VariantSpec) -> Result<Vec<u8>, TransformError> {
        if !self.is_available() {
            return Err(TransformError::EngineUnavailable);
        }

        let _permit = self.limiter.acquire().await;
        let args = engine_args(spec);
        debug!(filename = %spec.filename, args = ?args, "invoking transform engine");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    self.available.store(false, Ordering::Relaxed);
                    TransformError::EngineUnavailable
                } else {
                    TransformError::Io(err)
                }
            })?;

        // Feed stdin from a separate task; writing the whole source before
        // draining stdout can deadlock once the pipe buffers fill.
        let mut stdin = child.stdin.take().ok_or_else(|| {
            TransformError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "engine stdin not captured",
            ))
        })?;
        let source_bytes = source.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&source_bytes).await;
            drop(stdin);
            result
        });

        let output = child.wait_with_output().await?;
        if let Ok(Err(err)) = writer.await {
            // A broken pipe here means the engine exited early; its status
            // and stderr carry the real story.
            debug!(error = %err, "engine stdin write ended early");
        }

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TransformError::Failed {
                filename: spec.filename.clone(),
                message: if message.is_empty() {
                    format!("engine exited with {}", output.status)
                } else {
                    message
                },
            });
        }
        if output.stdout.is_empty() {
            return Err(TransformError::Failed {
                filename: spec.filename.clone(),
                message: "engine produced no output".to_string(),
            });
        }

        Ok(output.stdout)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}

/// Whether the engine binary can be spawned at all. A run that errors
/// still proves the binary exists; only a failed spawn counts against it.
fn probe_engine(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Builds the engine argument list for one derivation.
///
/// Reads the source from stdin (`-`) and writes the requested format to
/// stdout (`fmt:-`). Geometry follows the engine's convention: a bare
/// width scales the other side to preserve aspect ratio.
fn engine_args(spec: &VariantSpec) -> Vec<String> {
    let mut args = vec!["-".to_string()];
    let geometry = match (spec.width, spec.height) {
        (0, 0) => None,
        (width, 0) => Some(width.to_string()),
        (0, height) => Some(format!("x{height}")),
        (width, height) => Some(format!("{width}x{height}")),
    };
    if let Some(geometry) = geometry {
        args.push("-resize".to_string());
        args.push(geometry);
    }
    if spec.quality > 0 {
        args.push("-quality".to_string());
        args.push(spec.quality.to_string());
    }
    args.push(format!("{}:-", spec.format));
    args
}
