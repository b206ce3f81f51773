//! Error types for scrape-control
//!
//! This module provides the crate-level error surface. Task-level failures
//! (an extractor returning `success=false`, a cancelled batch, a failed
//! artifact write) are *values* carried on completion events, not errors —
//! the variants here cover the operations an embedder calls directly:
//! configuration, batch confirmation, scraper construction, and shutdown.

use thiserror::Error;

/// Result type alias for scrape-control operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scrape-control
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "worker_pool_size")
        key: Option<String>,
    },

    /// No scraper constructor is registered for the requested type
    #[error("unknown scraper type: {0}")]
    UnknownScraperType(String),

    /// Confirmation requested for a batch with no registered work and no expected total
    #[error("batch {0} has no registered links and no expected total")]
    EmptyBatch(String),

    /// The requested batch is not known to the aggregator
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// The control center was already started
    #[error("control center already started")]
    AlreadyStarted,

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Artifact persistence failed (write or post-write verification)
    #[error("artifact persistence failed: {0}")]
    Persistence(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}
