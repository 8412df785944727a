//! CLI runner for common setup and operations.
//!
//! Encapsulates logging initialization and startup reporting shared by
//! the command handlers.

use crate::error::CliError;
use imagekiln::logging::{default_log_dir, default_log_file, init_logging_full, LoggingGuard};
use tracing::info;

/// Runner that manages the CLI lifecycle.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
}

impl CliRunner {
    /// Create a new CLI runner with optional debug logging.
    ///
    /// Stdout logging stays off so log records never interleave with
    /// command output; records go to the log file instead.
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        let logging_guard =
            init_logging_full(default_log_dir(), default_log_file(), false, debug_mode)
                .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self { logging_guard })
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("ImageKiln v{}", imagekiln::VERSION);
        info!("ImageKiln CLI: {} command", command);
    }
}
