//! Atomic completion handling and immediate reassignment.
//!
//! Completion is two-phase locked: the terminal transition and worker
//! reset happen in one critical section, the artifact write and event
//! publication happen with no lock held, and the ramp-up plus next
//! assignment re-take the lock afterwards. The ordering — persist, then
//! publish, then pick up the next task — is load-bearing: subscribers may
//! rely on the artifact file existing when they receive the completion
//! event, and the worker must not launch its next extraction before the
//! prior result is safely on disk.

use chrono::Utc;

use crate::tracker::TaskUpdate;
use crate::types::{ScrapeResult, ScrapeTask, TaskStatus, WorkerId, WorkerState};

use super::ControlCenter;

impl ControlCenter {
    /// Handle a finished task and hand the worker its next one
    ///
    /// Idempotent under duplicate completion: if the task is already
    /// terminal when the lock is taken, the worker is reset to idle and
    /// reassigned, and no state change or event is produced — exactly one
    /// completion event exists per task across its lifetime.
    pub(crate) async fn complete_and_reassign(
        &self,
        worker_id: WorkerId,
        task: &ScrapeTask,
        result: ScrapeResult,
    ) {
        let completed_at = Utc::now();

        // Phase 1: terminal transition + worker reset, under the lock
        {
            let mut table = self.pool.assignment.lock().await;

            let current = self.tracker.status_of(&task.task_id).await;
            if let Some(status) = current
                && status.is_terminal()
            {
                tracing::warn!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    ?status,
                    "Duplicate completion detected; skipping state update and event"
                );
                if let Some(slot) = table.workers.get_mut(&worker_id) {
                    slot.current_task = None;
                    slot.state = WorkerState::Idle;
                }
                self.dequeue_and_assign(&mut table, worker_id).await;
                return;
            }

            let status = if result.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };

            self.tracker
                .update_status(
                    &task.task_id,
                    status,
                    TaskUpdate {
                        assigned_worker_id: Some(None),
                        completed_at: Some(completed_at),
                        result: Some(result.clone()),
                        error: result.error.clone(),
                        ..TaskUpdate::default()
                    },
                )
                .await;

            if let Some(slot) = table.workers.get_mut(&worker_id) {
                slot.current_task = None;
                slot.state = WorkerState::Idle;
                if result.success {
                    slot.tasks_completed += 1;
                } else {
                    slot.tasks_failed += 1;
                }
                tracing::info!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    success = result.success,
                    total_completed = slot.tasks_completed,
                    total_failed = slot.tasks_failed,
                    "Task reached terminal state"
                );
            }
        }

        // Phase 2, outside the lock: artifact on disk before anyone hears
        // about the completion
        let file_saved = if result.success {
            self.artifacts
                .persist(&result, task.scraper_type)
                .await
                .is_some()
        } else {
            false
        };
        if result.success && !file_saved {
            tracing::warn!(
                worker = %worker_id,
                task_id = %task.task_id,
                "Artifact was not persisted; completion event will carry file_saved=false"
            );
        }

        self.aggregator
            .record_terminal(task, &result, worker_id, file_saved, Some(completed_at))
            .await;

        // Phase 3: ramp up the pool if warranted and grab the next task.
        // Skipped once shutdown is signaled - assigning work the loop will
        // never process would strand it in Processing
        if self.pool.shutdown.is_cancelled() {
            return;
        }
        {
            let mut table = self.pool.assignment.lock().await;
            self.maybe_start_additional_worker(&mut table).await;
            if let Some(next) = self.dequeue_and_assign(&mut table, worker_id).await {
                let queue_size = self.queue.size().await;
                tracing::info!(
                    worker = %worker_id,
                    task_id = %next.task_id,
                    queue_size = queue_size,
                    "Next task assigned after completion"
                );
            }
        }
    }
}
