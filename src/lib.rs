//! # scrape-control
//!
//! Centralized scraping task scheduler with a dynamic work-stealing worker
//! pool.
//!
//! ## Design Philosophy
//!
//! scrape-control is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Extractor-agnostic** - Scrapers are black boxes behind one trait
//! - **Crash-honest** - A result is on disk before its completion event fires
//!
//! A *batch* is a named unit of work comprising many *tasks* (one URL × one
//! scraper modality). The embedder declares a batch's expected link set,
//! enqueues the tasks, and starts the pool. Workers continuously pull tasks
//! from the unified queue, invoke the registered extractor for each task's
//! scraper type, funnel stage progress through the aggregator, and on return
//! persist-then-publish the result and immediately pick up their next task.
//! The completion arbiter decides when downstream phases may begin.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scrape_control::{
//!     Config, ControlCenter, LinkDescriptor, ScrapeTask, ScraperFactory, ScraperType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut factory = ScraperFactory::new();
//!     // factory.register(ScraperType::Article, |ctx| Box::new(MyArticleScraper::new(ctx)));
//!
//!     let center = ControlCenter::new(Config::default(), factory).await?;
//!
//!     // Subscribe to events
//!     let mut events = center.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("event: {:?}", event);
//!         }
//!     });
//!
//!     // Declare and enqueue a batch
//!     let batch = "research_run_1".into();
//!     center
//!         .initialize_batch(
//!             &batch,
//!             &[LinkDescriptor {
//!                 link_id: "L1".into(),
//!                 url: "https://example.com/post".to_string(),
//!                 scraper_type: ScraperType::Article,
//!             }],
//!         )
//!         .await;
//!     center
//!         .add_task(ScrapeTask::new(
//!             "task_1",
//!             "research_run_1",
//!             "L1",
//!             "https://example.com/post",
//!             ScraperType::Article,
//!         ))
//!         .await?;
//!
//!     center.start().await?;
//!     center.wait_for_completion(None).await;
//!     let confirmation = center.confirm_all_scraping_complete(&batch).await?;
//!     assert!(confirmation.confirmed);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Artifact persistence
pub mod artifact;
/// Core control center implementation (decomposed into focused submodules)
pub mod center;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Progress aggregation and the completion arbiter
pub mod progress;
/// Unified task queue
pub mod queue;
/// Scraper contract and factory
pub mod scraper;
/// Authoritative task state tracking
pub mod tracker;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use artifact::{ArtifactWriter, JsonArtifactStore};
pub use center::ControlCenter;
pub use config::{Config, PersistenceConfig, PoolConfig, ProgressConfig, StageWeight};
pub use error::{Error, Result};
pub use progress::{CancelProbe, LinkProgress, ProgressAggregator, ProgressSink, StageProgress};
pub use queue::TaskQueue;
pub use scraper::{Scraper, ScraperContext, ScraperFactory};
pub use tracker::{StateTracker, TaskUpdate};
pub use types::{
    BatchId, CancellationInfo, CenterStats, CompletionMetadata, Confirmation, Event,
    LinkDescriptor, LinkId, LinkOutcome, LinkType, QueueStats, ScrapeResult, ScrapeTask,
    ScraperType, Stage, TaskId, TaskStatus, TrackerStats, WorkerId, WorkerPoolStats, WorkerState,
};

/// Helper function to run the control center with graceful signal handling.
///
/// Waits for a termination signal and then shuts the pool down, draining
/// in-flight tasks within the configured shutdown timeout.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use scrape_control::{Config, ControlCenter, ScraperFactory, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let center = ControlCenter::new(Config::default(), ScraperFactory::new()).await?;
///     center.start().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(center).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(center: ControlCenter) {
    wait_for_signal().await;
    let timeout = center.get_config().pool.shutdown_timeout();
    center.shutdown(true, timeout).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
