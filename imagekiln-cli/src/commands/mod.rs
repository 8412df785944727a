//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`process`] - One-shot variant derivation for local source images
//! - [`version`] - Version information

pub mod process;
pub mod version;
