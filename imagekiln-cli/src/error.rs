//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use imagekiln::orchestrator::ProcessError;
use imagekiln::service::ServiceError;
use imagekiln::transform::DEFAULT_ENGINE;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid command-line input
    Input(String),
    /// Failed to start the service
    ServiceStart(ServiceError),
    /// Failed to read a source image from disk
    FileRead { path: String, error: std::io::Error },
    /// The pipeline rejected or failed a source image
    Process { path: String, error: ProcessError },
    /// Some requested outputs failed to derive
    Outputs { path: String, failures: Vec<String> },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::ServiceStart(ServiceError::Cache(_)) => {
                eprintln!();
                eprintln!("Make sure --local-base-path points at a writable directory.");
            }
            CliError::Process {
                error: ProcessError::TransformUnavailable,
                ..
            } => {
                eprintln!();
                eprintln!("The transform engine was not found on PATH.");
                eprintln!(
                    "Install ImageMagick so the '{}' binary is available.",
                    DEFAULT_ENGINE
                );
            }
            CliError::Outputs { failures, .. } => {
                eprintln!();
                for failure in failures {
                    eprintln!("  failed: {}", failure);
                }
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Input(msg) => write!(f, "Invalid input: {}", msg),
            CliError::ServiceStart(e) => write!(f, "Failed to start service: {}", e),
            CliError::FileRead { path, error } => {
                write!(f, "Failed to read '{}': {}", path, error)
            }
            CliError::Process { path, error } => {
                write!(f, "Failed to process '{}': {}", path, error)
            }
            CliError::Outputs { path, failures } => {
                write!(
                    f,
                    "Failed to derive {} output(s) for '{}'",
                    failures.len(),
                    path
                )
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ServiceStart(e) => Some(e),
            CliError::FileRead { error, .. } => Some(error),
            CliError::Process { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        CliError::ServiceStart(e)
    }
}
