//! tornet library crate
//!
//! Periodically forces Tor onto fresh circuits and verifies that the exit
//! IP actually changed.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface (run, ip, status, stop)
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error taxonomy
//! - [`ip`] - Exit IP lookup through the SOCKS proxy
//! - [`rotation`] - Rotation controller and its collaborator traits
//! - [`scheduler`] - Wiring and signal handling
//! - [`service`] - Service-restart fallback
//! - [`state`] - Rotation history
//! - [`tor`] - Tor control port client
//! - [`util`] - Time, backoff helpers

#![allow(clippy::doc_markdown)] // Doc formatting is secondary
#![allow(clippy::uninlined_format_args)] // Format string style preference
#![allow(clippy::cast_possible_truncation)] // Millisecond counts fit in u64
#![allow(clippy::module_name_repetitions)] // Explicit types are clearer
#![allow(clippy::single_match_else)] // Match for clarity
#![allow(clippy::missing_errors_doc)] // Error types are self-describing

pub mod cli;
pub mod config;
pub mod error;
pub mod ip;
pub mod logging;
pub mod rotation;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod tor;
pub mod util;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
