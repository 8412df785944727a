//! Service health signals.
//!
//! Two flags, both owned here rather than in process-global state so
//! tests and embedders can run isolated instances. A status probe (the
//! load balancer's health check, or the shutdown report) reads them
//! through [`ServiceHealth::snapshot`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Overall service status derived from the health flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Serving normally.
    Ok,
    /// Up, but the transform engine is unavailable; derivations fail.
    Degraded,
    /// Draining; new work should go elsewhere.
    ShuttingDown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the health flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub transformer_available: bool,
    pub shutting_down: bool,
}

/// Shared health flags, safe to read and flip from any task.
#[derive(Debug)]
pub struct ServiceHealth {
    transformer_available: AtomicBool,
    shutting_down: AtomicBool,
}

impl ServiceHealth {
    /// Creates the flags with the transform engine's probed state.
    pub fn new(transformer_available: bool) -> Self {
        Self {
            transformer_available: AtomicBool::new(transformer_available),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Whether the transform engine is currently usable.
    pub fn transformer_available(&self) -> bool {
        self.transformer_available.load(Ordering::Relaxed)
    }

    /// Records the transform engine becoming available or not.
    pub fn set_transformer_available(&self, available: bool) {
        self.transformer_available.store(available, Ordering::Relaxed);
    }

    /// Marks the service as draining. One-way; there is no un-shutdown.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Current status. Shutdown outranks degradation.
    pub fn snapshot(&self) -> HealthSnapshot {
        let shutting_down = self.is_shutting_down();
        let transformer_available = self.transformer_available();
        let status = if shutting_down {
            HealthStatus::ShuttingDown
        } else if !transformer_available {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        HealthSnapshot {
            status,
            transformer_available,
            shutting_down,
        }
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new(true)
    }
}
