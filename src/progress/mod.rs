//! Per-batch progress aggregation, status emission, and the completion
//! arbiter.
//!
//! The aggregator reconciles the work a batch was *expected* to comprise
//! against the work actually *observed*: link ids may be declared eagerly
//! via [`ProgressAggregator::initialize_batch`], registered lazily when
//! progress arrives for an unknown link, or — as a recovery path — adopted
//! wholesale at confirmation time when initialization was skipped but work
//! proceeded anyway. The arbiter never declares 100% before every expected
//! task reached a terminal state, and `scraping:100_percent_complete` fires
//! exactly once per batch lifetime.

pub mod weights;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ProgressConfig;
use crate::error::{Error, Result};
use crate::types::{
    BatchId, CancellationInfo, CompletionMetadata, Confirmation, Event, LinkDescriptor, LinkId,
    LinkOutcome, ScrapeResult, ScrapeTask, ScraperType, Stage, WorkerId,
};

use weights::WeightTable;

/// One stage report from an extractor
#[derive(Clone, Debug)]
pub struct StageProgress {
    /// Current pipeline stage
    pub stage: Stage,
    /// Stage-local progress (0-100)
    pub progress: f64,
    /// Human-readable status line
    pub message: String,
    /// Bytes downloaded so far, when the stage tracks them
    pub bytes_downloaded: Option<u64>,
    /// Total bytes expected, when known
    pub total_bytes: Option<u64>,
}

impl StageProgress {
    /// Convenience constructor for the common stage+progress+message case
    pub fn new(stage: Stage, progress: f64, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress,
            message: message.into(),
            bytes_downloaded: None,
            total_bytes: None,
        }
    }
}

/// Progress record for one registered link
#[derive(Clone, Debug)]
pub struct LinkProgress {
    /// Target URL
    pub url: String,
    /// Extractor handling the link
    pub scraper_type: ScraperType,
    /// Current stage
    pub stage: Stage,
    /// Stage-local progress (0-100)
    pub stage_progress: f64,
    /// Normalized overall progress (0-100)
    pub overall_progress: f64,
    /// Last status line
    pub message: String,
    /// Error string, once failed
    pub error: Option<String>,
    /// Word count, once completed
    pub word_count: u64,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl LinkProgress {
    fn registered(url: String, scraper_type: ScraperType) -> Self {
        Self {
            url,
            scraper_type,
            stage: Stage::Pending,
            stage_progress: 0.0,
            overall_progress: 0.0,
            message: String::new(),
            error: None,
            word_count: 0,
            updated_at: Utc::now(),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.stage, Stage::Completed | Stage::Failed)
    }
}

/// Per-batch aggregator state
struct BatchState {
    expected_total: usize,
    links: HashMap<LinkId, LinkProgress>,
    cancelled: bool,
    cancellation: Option<CancellationInfo>,
    complete_emitted: bool,
    last_status_emit: Option<Instant>,
}

impl BatchState {
    fn new() -> Self {
        Self {
            expected_total: 0,
            links: HashMap::new(),
            cancelled: false,
            cancellation: None,
            complete_emitted: false,
            last_status_emit: None,
        }
    }

    fn completed_count(&self) -> usize {
        self.links
            .values()
            .filter(|l| l.stage == Stage::Completed)
            .count()
    }

    fn failed_count(&self) -> usize {
        self.links
            .values()
            .filter(|l| l.stage == Stage::Failed)
            .count()
    }

    fn in_progress_count(&self) -> usize {
        self.links
            .values()
            .filter(|l| !l.is_terminal() && l.stage != Stage::Pending)
            .count()
    }

    fn mean_overall(&self) -> f64 {
        if self.links.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.links.values().map(|l| l.overall_progress).sum();
        sum / self.links.len() as f64
    }
}

/// Batch-scoped progress registry, status emitter, and completion arbiter
pub struct ProgressAggregator {
    batches: Mutex<HashMap<BatchId, BatchState>>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
    weights: WeightTable,
    status_interval: std::time::Duration,
}

impl ProgressAggregator {
    /// Create an aggregator emitting on the given broadcast channel
    pub fn new(event_tx: tokio::sync::broadcast::Sender<Event>, config: &ProgressConfig) -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            event_tx,
            weights: WeightTable::from_config(config),
            status_interval: config.status_interval(),
        }
    }

    fn emit(&self, event: Event) {
        // send() errs only when there are no subscribers, which is fine
        self.event_tx.send(event).ok();
    }

    /// Declare a batch's expected link set before work is enqueued
    ///
    /// Registers each descriptor as a pending link, sets the expected total
    /// to the descriptor count, and emits `batch:initialized`. Links that
    /// show up later anyway (late-discovered work) are still registered
    /// lazily by the progress paths. Returns the number of registered
    /// links.
    pub async fn initialize_batch(&self, batch_id: &BatchId, links: &[LinkDescriptor]) -> usize {
        let mut batches = self.batches.lock().await;
        let state = batches
            .entry(batch_id.clone())
            .or_insert_with(BatchState::new);

        for descriptor in links {
            state
                .links
                .entry(descriptor.link_id.clone())
                .or_insert_with(|| {
                    LinkProgress::registered(descriptor.url.clone(), descriptor.scraper_type)
                });
        }
        state.expected_total = links.len();

        let mut breakdown: HashMap<String, usize> = HashMap::new();
        for descriptor in links {
            *breakdown
                .entry(descriptor.scraper_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        let distinct_urls = links
            .iter()
            .map(|d| d.url.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        tracing::info!(
            batch_id = %batch_id,
            expected_total = state.expected_total,
            total_links = distinct_urls,
            "Batch initialized"
        );

        self.emit(Event::BatchInitialized {
            batch_id: batch_id.clone(),
            expected_total: state.expected_total,
            total_processes: links.len(),
            total_links: distinct_urls,
            breakdown,
        });

        state.links.len()
    }

    /// Mark a link as picked up by a worker and emit `scraping:start_link`
    pub async fn mark_link_started(
        &self,
        batch_id: &BatchId,
        link_id: &LinkId,
        url: &str,
        scraper_type: ScraperType,
        worker_id: WorkerId,
    ) {
        let mut batches = self.batches.lock().await;
        let state = batches
            .entry(batch_id.clone())
            .or_insert_with(BatchState::new);
        let link = state
            .links
            .entry(link_id.clone())
            .or_insert_with(|| LinkProgress::registered(url.to_string(), scraper_type));

        link.stage = Stage::InProgress;
        link.stage_progress = 0.0;
        link.message = format!("Starting {} extraction", scraper_type);
        link.updated_at = Utc::now();

        self.emit(Event::StartLink {
            batch_id: batch_id.clone(),
            link_id: link_id.clone(),
            url: url.to_string(),
            scraper: scraper_type,
            worker_id,
            message: format!("Starting {} extraction", scraper_type),
        });
    }

    /// Record a stage report, emit `scraping:progress`, and maybe a
    /// throttled `scraping:status`
    ///
    /// Unknown link ids are registered on the fly so late-discovered work
    /// is not lost.
    pub async fn record_stage(
        &self,
        batch_id: &BatchId,
        link_id: &LinkId,
        url: &str,
        scraper_type: ScraperType,
        worker_id: WorkerId,
        update: StageProgress,
    ) {
        let overall = self
            .weights
            .overall(scraper_type, update.stage, update.progress);

        let mut batches = self.batches.lock().await;
        let state = batches
            .entry(batch_id.clone())
            .or_insert_with(BatchState::new);
        let link = state
            .links
            .entry(link_id.clone())
            .or_insert_with(|| LinkProgress::registered(url.to_string(), scraper_type));

        // A straggling report after the terminal transition must not
        // resurrect the link
        if link.is_terminal() {
            tracing::debug!(
                batch_id = %batch_id,
                link_id = %link_id,
                stage = update.stage.as_str(),
                "Dropping progress for terminal link"
            );
            return;
        }

        link.stage = update.stage;
        link.stage_progress = update.progress.clamp(0.0, 100.0);
        link.overall_progress = overall;
        link.message = update.message.clone();
        link.updated_at = Utc::now();

        self.emit(Event::Progress {
            batch_id: batch_id.clone(),
            link_id: link_id.clone(),
            url: url.to_string(),
            scraper: scraper_type,
            stage: update.stage,
            progress: update.progress.clamp(0.0, 100.0),
            overall_progress: overall,
            message: update.message,
            bytes_downloaded: update.bytes_downloaded,
            total_bytes: update.total_bytes,
            worker_id,
        });

        self.maybe_emit_status(batch_id, state, false);
    }

    /// Record a terminal transition and emit `scraping:complete_link`
    ///
    /// Always emits a status snapshot, and fires
    /// `scraping:100_percent_complete` the first time the batch's terminal
    /// count reaches a declared expected total.
    pub async fn record_terminal(
        &self,
        task: &ScrapeTask,
        result: &ScrapeResult,
        worker_id: WorkerId,
        file_saved: bool,
        completed_at: Option<DateTime<Utc>>,
    ) {
        let outcome = if result.success {
            LinkOutcome::Success
        } else {
            LinkOutcome::Failed
        };
        let error = result.error.clone().or_else(|| task.error.clone());
        let message = match outcome {
            LinkOutcome::Success => format!("Completed: {} words extracted", result.word_count),
            LinkOutcome::Failed => match &error {
                Some(e) => format!("Failed: {}", e),
                None => "Failed: Unknown error".to_string(),
            },
        };

        let mut batches = self.batches.lock().await;
        let state = batches
            .entry(task.batch_id.clone())
            .or_insert_with(BatchState::new);
        let link = state.links.entry(task.link_id.clone()).or_insert_with(|| {
            LinkProgress::registered(task.url.clone(), task.scraper_type)
        });

        match outcome {
            LinkOutcome::Success => {
                link.stage = Stage::Completed;
                link.stage_progress = 100.0;
                link.overall_progress = 100.0;
                link.word_count = result.word_count;
            }
            LinkOutcome::Failed => {
                link.stage = Stage::Failed;
                link.error = error.clone();
            }
        }
        link.message = message.clone();
        link.updated_at = Utc::now();

        self.emit(Event::CompleteLink {
            batch_id: task.batch_id.clone(),
            link_id: task.link_id.clone(),
            url: task.url.clone(),
            scraper: task.scraper_type,
            status: outcome,
            message,
            word_count: result.word_count,
            error: if outcome == LinkOutcome::Failed {
                error
            } else {
                None
            },
            worker_id,
            metadata: CompletionMetadata {
                source: task.scraper_type.as_str().to_string(),
                task_id: task.task_id.clone(),
                completed_at,
                file_saved,
            },
        });

        self.maybe_emit_status(&task.batch_id, state, true);

        // Fire the one-shot completion signal when a declared expected
        // total is reached. The floor also counts late-registered links
        // beyond the declaration, so extra discovered work postpones the
        // signal rather than being orphaned by it. Batches that were never
        // initialized get this signal from the confirmation arbiter
        // instead, once it adopts the registered count.
        let total_final = state.completed_count() + state.failed_count();
        let completion_floor = state.expected_total.max(state.links.len());
        if state.expected_total > 0 && total_final >= completion_floor && !state.complete_emitted {
            state.complete_emitted = true;
            tracing::info!(
                batch_id = %task.batch_id,
                expected_total = state.expected_total,
                completed = state.completed_count(),
                failed = state.failed_count(),
                "All expected work reached a terminal state"
            );
            self.emit(Event::AllComplete {
                batch_id: task.batch_id.clone(),
                expected_total: state.expected_total,
                completed_count: state.completed_count(),
                failed_count: state.failed_count(),
            });
        }
    }

    /// Emit a status snapshot if the throttle window allows it
    ///
    /// Terminal transitions (`force`) always emit.
    fn maybe_emit_status(&self, batch_id: &BatchId, state: &mut BatchState, force: bool) {
        let now = Instant::now();
        if !force
            && let Some(last) = state.last_status_emit
            && now.duration_since(last) < self.status_interval
        {
            return;
        }
        state.last_status_emit = Some(now);

        let completed = state.completed_count();
        let failed = state.failed_count();
        let total_final = completed + failed;
        let registered = state.links.len();
        let denominator = state.expected_total.max(registered).max(1);
        let is_100_percent =
            state.expected_total > 0 && total_final >= state.expected_total.max(registered);

        self.emit(Event::Status {
            batch_id: batch_id.clone(),
            expected_total: state.expected_total,
            total: registered,
            completed,
            failed,
            in_progress: state.in_progress_count(),
            completion_rate: total_final as f64 / denominator as f64,
            overall_progress: state.mean_overall(),
            is_100_percent,
        });
    }

    /// Decide whether all expected work of a batch reached a terminal state
    ///
    /// Reconciliation rules, in order: a declared expected total wins; when
    /// none was declared but links are registered, the registered count is
    /// adopted as the expected total (recovery for callers that skipped
    /// initialization); a batch with neither is refused with
    /// [`Error::EmptyBatch`]. A cancelled batch confirms immediately with
    /// `cancelled=true` regardless of counts.
    pub async fn confirm_all_scraping_complete(&self, batch_id: &BatchId) -> Result<Confirmation> {
        let mut batches = self.batches.lock().await;
        let state = batches
            .get_mut(batch_id)
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;

        let registered = state.links.len();

        if registered > state.expected_total {
            if state.expected_total == 0 {
                tracing::warn!(
                    batch_id = %batch_id,
                    adopted = registered,
                    "Expected total was never declared; adopting registered link count"
                );
            } else {
                tracing::debug!(
                    batch_id = %batch_id,
                    declared = state.expected_total,
                    registered,
                    "More links registered than declared; raising expected total"
                );
            }
            state.expected_total = registered;
        }

        if state.expected_total == 0 && registered == 0 && !state.cancelled {
            return Err(Error::EmptyBatch(batch_id.to_string()));
        }

        let completed_count = state.completed_count();
        let failed_count = state.failed_count();
        let total_final = completed_count + failed_count;
        let completion_rate = total_final as f64 / state.expected_total.max(1) as f64;
        let is_100_percent = state.expected_total > 0 && total_final >= state.expected_total;
        let confirmed = is_100_percent || state.cancelled;

        if is_100_percent && !state.complete_emitted {
            state.complete_emitted = true;
            self.emit(Event::AllComplete {
                batch_id: batch_id.clone(),
                expected_total: state.expected_total,
                completed_count,
                failed_count,
            });
        }

        Ok(Confirmation {
            confirmed,
            expected_total: state.expected_total,
            registered_count: registered,
            completed_count,
            failed_count,
            total_final,
            completion_rate,
            is_100_percent,
            cancelled: state.cancelled,
            cancellation_info: state.cancellation.clone(),
        })
    }

    /// Cancel a batch
    ///
    /// Sets the cooperative cancellation flag checked by workers and
    /// extractors and emits `scraping:cancelled` once. In-flight extractions
    /// are never preempted; at worst the current task finishes.
    pub async fn cancel_batch(&self, batch_id: &BatchId, reason: &str) {
        let mut batches = self.batches.lock().await;
        let state = batches
            .entry(batch_id.clone())
            .or_insert_with(BatchState::new);

        if state.cancelled {
            tracing::debug!(batch_id = %batch_id, "Batch already cancelled");
            return;
        }

        state.cancelled = true;
        state.cancellation = Some(CancellationInfo {
            reason: reason.to_string(),
            cancelled_at: Utc::now(),
        });

        tracing::info!(batch_id = %batch_id, reason, "Batch cancelled");

        self.emit(Event::Cancelled {
            batch_id: batch_id.clone(),
            reason: reason.to_string(),
        });
    }

    /// Whether a batch's cancellation flag is set
    pub async fn is_batch_cancelled(&self, batch_id: &BatchId) -> bool {
        self.batches
            .lock()
            .await
            .get(batch_id)
            .map(|s| s.cancelled)
            .unwrap_or(false)
    }

    /// The reconciled expected total for a batch, if known
    pub async fn expected_total(&self, batch_id: &BatchId) -> Option<usize> {
        self.batches
            .lock()
            .await
            .get(batch_id)
            .map(|s| s.expected_total)
    }

    /// Snapshot of one link's progress record
    pub async fn link_progress(&self, batch_id: &BatchId, link_id: &LinkId) -> Option<LinkProgress> {
        self.batches
            .lock()
            .await
            .get(batch_id)
            .and_then(|s| s.links.get(link_id).cloned())
    }

    /// Snapshots of all registered links of a batch
    pub async fn batch_links(&self, batch_id: &BatchId) -> Vec<(LinkId, LinkProgress)> {
        self.batches
            .lock()
            .await
            .get(batch_id)
            .map(|s| {
                s.links
                    .iter()
                    .map(|(id, link)| (id.clone(), link.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop all state for a batch (explicit teardown)
    pub async fn remove_batch(&self, batch_id: &BatchId) -> bool {
        self.batches.lock().await.remove(batch_id).is_some()
    }
}

/// Cloneable handle extractors use to report stage progress
///
/// Wraps the aggregator with the task context (batch, link, URL, scraper,
/// worker) injected, so scrapers only ever supply stage-level data.
#[derive(Clone)]
pub struct ProgressSink {
    aggregator: Arc<ProgressAggregator>,
    batch_id: BatchId,
    link_id: LinkId,
    url: String,
    scraper_type: ScraperType,
    worker_id: WorkerId,
}

impl ProgressSink {
    /// Bind a sink to one task's context
    pub fn new(
        aggregator: Arc<ProgressAggregator>,
        task: &ScrapeTask,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            aggregator,
            batch_id: task.batch_id.clone(),
            link_id: task.link_id.clone(),
            url: task.url.clone(),
            scraper_type: task.scraper_type,
            worker_id,
        }
    }

    /// Report one stage update
    pub async fn report(&self, update: StageProgress) {
        self.aggregator
            .record_stage(
                &self.batch_id,
                &self.link_id,
                &self.url,
                self.scraper_type,
                self.worker_id,
                update,
            )
            .await;
    }
}

/// Cloneable cooperative cancellation predicate handed to extractors
///
/// Combines the process-wide shutdown token with the owning batch's
/// cancellation flag. Extractors should poll this at their own coarse
/// checkpoints (before/after major network calls).
#[derive(Clone)]
pub struct CancelProbe {
    shutdown: CancellationToken,
    aggregator: Arc<ProgressAggregator>,
    batch_id: BatchId,
}

impl CancelProbe {
    /// Build a probe for one batch
    pub fn new(
        shutdown: CancellationToken,
        aggregator: Arc<ProgressAggregator>,
        batch_id: BatchId,
    ) -> Self {
        Self {
            shutdown,
            aggregator,
            batch_id,
        }
    }

    /// Whether the task should stop as soon as practical
    pub async fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.aggregator.is_batch_cancelled(&self.batch_id).await
    }
}
