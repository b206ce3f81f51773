//! Core control center implementation split into focused submodules.
//!
//! The `ControlCenter` struct and its methods are organized by domain:
//! - [`enqueue`] - Task intake and validation
//! - [`assignment`] - The dequeue-and-assign critical section and worker ramp-up
//! - [`worker`] - The long-lived worker loop and task processing
//! - [`completion`] - Atomic completion handling and reassignment
//! - [`control`] - Batch control (cancellation, confirmation, statistics)
//! - [`lifecycle`] - Startup and shutdown coordination

mod assignment;
mod completion;
mod control;
mod enqueue;
mod lifecycle;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use chrono::{DateTime, Utc};

use crate::artifact::{ArtifactWriter, JsonArtifactStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::ProgressAggregator;
use crate::queue::TaskQueue;
use crate::scraper::ScraperFactory;
use crate::tracker::StateTracker;
use crate::types::{ScrapeTask, WorkerId, WorkerState};

/// One slot in the worker table
///
/// Slots for the whole pool are created at start; only the first is spawned
/// immediately, the rest start gradually as completions observe queued
/// work. All mutation happens under the assignment lock.
pub(crate) struct WorkerSlot {
    /// Worker identifier
    pub(crate) id: WorkerId,
    /// Current state
    pub(crate) state: WorkerState,
    /// Task currently being processed, if any
    pub(crate) current_task: Option<ScrapeTask>,
    /// Whether the worker task has been spawned
    pub(crate) started: bool,
    /// Join handle for the spawned worker task
    pub(crate) handle: Option<tokio::task::JoinHandle<()>>,
    /// Tasks this worker completed successfully
    pub(crate) tasks_completed: u64,
    /// Tasks this worker failed
    pub(crate) tasks_failed: u64,
    /// When the slot was created
    pub(crate) created_at: DateTime<Utc>,
}

impl WorkerSlot {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            current_task: None,
            started: false,
            handle: None,
            tasks_completed: 0,
            tasks_failed: 0,
            created_at: Utc::now(),
        }
    }
}

/// Worker table guarded by the assignment lock
///
/// The assignment lock serializes every worker-state ↔ task-state
/// co-transition: dequeue-and-assign, complete-and-reassign, and worker
/// ramp-up. It is held only for CPU-bounded bookkeeping, never across
/// extraction or disk I/O.
#[derive(Default)]
pub(crate) struct WorkerTable {
    /// Slots by worker id
    pub(crate) workers: HashMap<WorkerId, WorkerSlot>,
}

/// Start/end timestamps for statistics
#[derive(Default)]
pub(crate) struct LifecycleTimes {
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

/// Worker pool and shutdown state
#[derive(Clone)]
pub(crate) struct PoolState {
    /// The assignment lock: worker table plus every co-transition on it
    pub(crate) assignment: Arc<tokio::sync::Mutex<WorkerTable>>,
    /// Process-wide shutdown signal; workers notice on their next loop head
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
    /// Diagnostic counter: dequeues that found a terminal or taken task
    pub(crate) race_conditions: Arc<AtomicU64>,
    /// Start/end timestamps
    pub(crate) lifecycle: Arc<tokio::sync::Mutex<LifecycleTimes>>,
}

/// Centralized scraping control center (cloneable - all fields are Arc-wrapped)
///
/// Owns the unified task queue, the authoritative state tracker, a bounded
/// pool of workers that assign themselves work atomically, the per-batch
/// progress aggregator, and the artifact store. Embedders subscribe to the
/// event broadcast channel and feed tasks in; workers continuously pull
/// tasks, invoke the registered extractor for each task's scraper type, and
/// persist-then-publish results.
#[derive(Clone)]
pub struct ControlCenter {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<crate::types::Event>,
    /// Unified FIFO task queue
    pub(crate) queue: Arc<TaskQueue>,
    /// Authoritative task state
    pub(crate) tracker: Arc<StateTracker>,
    /// Scraper construction table
    pub(crate) factory: Arc<ScraperFactory>,
    /// Per-batch progress registry and completion arbiter
    pub(crate) aggregator: Arc<ProgressAggregator>,
    /// Artifact persistence backend (trait object for pluggable implementations)
    pub(crate) artifacts: Arc<dyn ArtifactWriter>,
    /// Worker pool and shutdown state
    pub(crate) pool: PoolState,
}

impl ControlCenter {
    /// Create a new control center
    ///
    /// Validates the configuration, bootstraps the results directory, and
    /// wires the event channel. Workers are not spawned until
    /// [`ControlCenter::start`] is called.
    pub async fn new(config: Config, factory: ScraperFactory) -> Result<Self> {
        let store = JsonArtifactStore::new(&config.persistence);
        Self::with_artifact_writer(config, factory, Arc::new(store)).await
    }

    /// Create a control center with a custom artifact persistence backend
    pub async fn with_artifact_writer(
        config: Config,
        factory: ScraperFactory,
        artifacts: Arc<dyn ArtifactWriter>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.persistence.results_root)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create results directory '{}': {}",
                        config.persistence.results_root.display(),
                        e
                    ),
                ))
            })?;

        // Buffered so slow subscribers do not stall workers; a subscriber
        // that falls more than 1024 events behind sees RecvError::Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1024);

        let aggregator = Arc::new(ProgressAggregator::new(event_tx.clone(), &config.progress));

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            queue: Arc::new(TaskQueue::new()),
            tracker: Arc::new(StateTracker::new()),
            factory: Arc::new(factory),
            aggregator,
            artifacts,
            pool: PoolState {
                assignment: Arc::new(tokio::sync::Mutex::new(WorkerTable::default())),
                shutdown: tokio_util::sync::CancellationToken::new(),
                race_conditions: Arc::new(AtomicU64::new(0)),
                lifecycle: Arc::new(tokio::sync::Mutex::new(LifecycleTimes::default())),
            },
        })
    }

    /// Subscribe to scraping events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use scrape_control::{Config, ControlCenter, ScraperFactory};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let center = ControlCenter::new(Config::default(), ScraperFactory::new()).await?;
    ///
    ///     let mut events = center.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("event: {:?}", event);
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::types::Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// scraping continues even when no one is listening.
    pub(crate) fn emit_event(&self, event: crate::types::Event) {
        self.event_tx.send(event).ok();
    }
}
