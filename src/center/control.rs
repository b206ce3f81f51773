//! Batch control — initialization, cancellation, confirmation, statistics.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::types::{
    BatchId, CenterStats, Confirmation, LinkDescriptor, WorkerPoolStats, WorkerState,
};

use super::ControlCenter;

/// Interval between completion polls in `wait_for_completion`
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl ControlCenter {
    /// Declare a batch's expected link set and emit `batch:initialized`
    ///
    /// Calling this before enqueueing the batch's tasks gives the
    /// completion arbiter its expected total up front. It is optional —
    /// work for undeclared links is registered lazily and the arbiter
    /// adopts the registered count at confirmation time — but eager
    /// declaration lets the 100% signal fire the moment the last task
    /// lands rather than at the next confirmation poll.
    pub async fn initialize_batch(&self, batch_id: &BatchId, links: &[LinkDescriptor]) -> usize {
        self.aggregator.initialize_batch(batch_id, links).await
    }

    /// Cancel a batch cooperatively
    ///
    /// Workers and extractors observe the flag at their next checkpoint;
    /// in-flight extractions are never preempted. Remaining tasks of the
    /// batch fail with `"Cancelled by user"` as workers reach them.
    pub async fn cancel_batch(&self, batch_id: &BatchId, reason: &str) {
        self.aggregator.cancel_batch(batch_id, reason).await;
    }

    /// Whether a batch has been cancelled
    pub async fn is_batch_cancelled(&self, batch_id: &BatchId) -> bool {
        self.aggregator.is_batch_cancelled(batch_id).await
    }

    /// Ask the completion arbiter whether the downstream phase may begin
    ///
    /// See [`crate::progress::ProgressAggregator::confirm_all_scraping_complete`]
    /// for the reconciliation rules.
    pub async fn confirm_all_scraping_complete(&self, batch_id: &BatchId) -> Result<Confirmation> {
        self.aggregator.confirm_all_scraping_complete(batch_id).await
    }

    /// Block until every tracked task is terminal and the queue is empty
    ///
    /// Polls every 500 ms. Returns false on timeout or when shutdown is
    /// signaled while waiting.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let started = tokio::time::Instant::now();

        loop {
            let stats = self.tracker.statistics().await;
            let queue_size = self.queue.size().await;

            if stats.pending + stats.processing == 0 && queue_size == 0 {
                let mut times = self.pool.lifecycle.lock().await;
                if times.ended_at.is_none() {
                    times.ended_at = Some(Utc::now());
                }
                tracing::info!("All tasks completed");
                return true;
            }

            if let Some(limit) = timeout
                && started.elapsed() > limit
            {
                tracing::warn!(
                    pending = stats.pending + stats.processing,
                    queue_size,
                    "Timed out waiting for completion"
                );
                return false;
            }

            if self.pool.shutdown.is_cancelled() {
                tracing::info!("Shutdown signaled while waiting for completion");
                return false;
            }

            tokio::time::sleep(COMPLETION_POLL_INTERVAL).await;
        }
    }

    /// Comprehensive statistics across queue, tracker, and worker pool
    pub async fn statistics(&self) -> CenterStats {
        let queue = self.queue.statistics().await;
        let tasks = self.tracker.statistics().await;

        let workers = {
            let table = self.pool.assignment.lock().await;
            let mut stats = WorkerPoolStats::default();
            for slot in table.workers.values() {
                match slot.state {
                    WorkerState::Idle => stats.idle += 1,
                    WorkerState::Processing => stats.processing += 1,
                    WorkerState::Terminated => stats.terminated += 1,
                }
                stats.total_completed += slot.tasks_completed;
                stats.total_failed += slot.tasks_failed;
            }
            stats
        };

        let (started_at, ended_at) = {
            let times = self.pool.lifecycle.lock().await;
            (times.started_at, times.ended_at)
        };
        let elapsed_seconds = started_at.map(|start| {
            let end = ended_at.unwrap_or_else(Utc::now);
            (end - start).num_milliseconds() as f64 / 1000.0
        });

        CenterStats {
            queue,
            tasks,
            workers,
            race_conditions_detected: self.pool.race_conditions.load(Ordering::Relaxed),
            elapsed_seconds,
            started_at,
            ended_at,
        }
    }
}
