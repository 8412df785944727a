//! ImageKiln - origin-side image transformation and caching
//!
//! This library sits between a CDN and the original image assets. Given a
//! variant filename such as `640x480-q80.webp`, it fetches the source image
//! once, derives the requested outputs, persists them in a local filesystem
//! cache, and mirrors them to a remote store in the background. Concurrent
//! requests for the same cache key are coalesced so each transformation runs
//! at most once.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use imagekiln::config::ServerConfig;
//! use imagekiln::service::ImageKilnService;
//!
//! let config = ServerConfig::default().with_local_base_path("/var/cache/imagekiln");
//! let service = ImageKilnService::start(config).await?;
//!
//! let processed = service
//!     .process_request("products", ["catalog", "42", "", ""], "x300.jpg", &[])
//!     .await?;
//! println!("{}", processed.local_path.display());
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod gate;
pub mod health;
pub mod key;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod reaper;
pub mod resolver;
pub mod service;
pub mod transform;
pub mod upload;

/// Version of the ImageKiln library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
