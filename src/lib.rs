//! Batch field extraction from PDF documents.
//!
//! Files are queued on a [`batch::BatchController`], sent through the
//! remote parse and extract calls of an [`extract::Extractor`], and the
//! structured results are held per file for review and export.

pub mod batch;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod extract;
pub mod fields;
pub mod models;
pub mod types;

pub use error::{Error, ExtractionError, Result};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
