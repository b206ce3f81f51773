//! The dequeue-and-assign critical section and gradual worker ramp-up.
//!
//! Both entry points here require the caller to hold the assignment lock —
//! they take `&mut WorkerTable` precisely so the borrow checker enforces
//! that. The queue itself is a dumb container, so every dequeued task is
//! revalidated against the state tracker before it is handed to a worker:
//! races routinely leave already-terminal or already-taken tasks in the
//! queue, and those must be discarded or yielded back rather than
//! reprocessed.

use std::sync::atomic::Ordering;

use chrono::Utc;

use crate::tracker::TaskUpdate;
use crate::types::{ScrapeTask, TaskStatus, WorkerId, WorkerState};

use super::{ControlCenter, WorkerTable};

impl ControlCenter {
    /// Atomically move a task from the queue to an idle worker
    ///
    /// Must be called while holding the assignment lock (enforced by the
    /// `&mut WorkerTable` parameter). Dequeues until it finds a task that
    /// is still pending, discarding terminal ghosts permanently and
    /// returning tasks taken by another worker to the tail. After
    /// `assign_retry_limit` consecutive invalid items it sweeps the whole
    /// queue instead of retrying one item at a time.
    ///
    /// Returns the assigned task, or `None` when no assignable work exists.
    pub(crate) async fn dequeue_and_assign(
        &self,
        table: &mut WorkerTable,
        worker_id: WorkerId,
    ) -> Option<ScrapeTask> {
        // Double-check the worker is actually idle; a completion handler
        // may already have assigned it work
        match table.workers.get(&worker_id) {
            Some(slot) if slot.state == WorkerState::Idle => {}
            _ => return None,
        }

        let retry_limit = self.config.pool.assign_retry_limit;
        let mut invalid_removed = 0u64;

        for _ in 0..retry_limit {
            let Some(task) = self.queue.try_dequeue().await else {
                if invalid_removed > 0 {
                    tracing::warn!(
                        worker = %worker_id,
                        invalid_removed,
                        "Queue emptied while discarding invalid tasks"
                    );
                }
                return None;
            };

            let status = self.tracker.status_of(&task.task_id).await;

            if let Some(status) = status
                && status.is_terminal()
            {
                // Race: task finished elsewhere while queued. Discard
                // permanently - returning it would livelock the pool
                self.pool.race_conditions.fetch_add(1, Ordering::Relaxed);
                invalid_removed += 1;
                tracing::warn!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    link_id = %task.link_id,
                    ?status,
                    races = self.pool.race_conditions.load(Ordering::Relaxed),
                    "Dequeued already-terminal task; discarding"
                );
                continue;
            }

            if status == Some(TaskStatus::Processing) {
                // Taken by another worker in an earlier race; yield it
                // back and try the next item
                self.pool.race_conditions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    "Dequeued task already processing elsewhere; returning to tail"
                );
                self.queue.return_to_tail(task).await;
                continue;
            }

            // Pending, or absent from the tracker - treated as pending
            if status.is_none() {
                self.tracker.add(task.clone()).await;
            }

            let started_at = Utc::now();
            self.tracker
                .update_status(
                    &task.task_id,
                    TaskStatus::Processing,
                    TaskUpdate {
                        assigned_worker_id: Some(Some(worker_id)),
                        started_at: Some(started_at),
                        ..TaskUpdate::default()
                    },
                )
                .await;

            let mut assigned = task;
            assigned.status = TaskStatus::Processing;
            assigned.assigned_worker_id = Some(worker_id);
            assigned.started_at = Some(started_at);

            if let Some(slot) = table.workers.get_mut(&worker_id) {
                slot.state = WorkerState::Processing;
                slot.current_task = Some(assigned.clone());
            }

            if invalid_removed > 0 {
                tracing::info!(
                    worker = %worker_id,
                    task_id = %assigned.task_id,
                    invalid_removed,
                    "Task assigned after discarding invalid tasks"
                );
            } else {
                tracing::debug!(
                    worker = %worker_id,
                    task_id = %assigned.task_id,
                    "Task assigned"
                );
            }
            return Some(assigned);
        }

        // Retry bound exhausted: the queue may be packed with terminal
        // ghosts. Sweep it whole - dequeue everything, keep only items that
        // are still pending or merely taken by another worker
        self.sweep_queue(worker_id, invalid_removed).await;
        None
    }

    /// Drain the entire queue and revalidate every item
    ///
    /// Pending and processing-elsewhere items go back in their original
    /// order; terminal and unknown-state items are dropped for good. This
    /// is the backstop that keeps the retry loop in
    /// [`ControlCenter::dequeue_and_assign`] from livelocking.
    async fn sweep_queue(&self, worker_id: WorkerId, already_removed: u64) {
        let drained = self.queue.drain_all().await;
        tracing::error!(
            worker = %worker_id,
            retry_limit = self.config.pool.assign_retry_limit,
            queue_size = drained.len(),
            invalid_removed = already_removed,
            "Exhausted assignment retries; sweeping the whole queue"
        );

        let mut kept = 0usize;
        let mut dropped = 0usize;
        for task in drained {
            let status = self.tracker.status_of(&task.task_id).await;
            if let Some(status) = status
                && status.is_terminal()
            {
                dropped += 1;
                tracing::debug!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    ?status,
                    "Sweep dropped terminal task"
                );
            } else {
                // Pending, processing elsewhere, or untracked new work
                kept += 1;
                self.queue.return_to_tail(task).await;
            }
        }

        if dropped > 0 {
            tracing::warn!(
                worker = %worker_id,
                dropped,
                kept,
                "Sweep cleaned invalid tasks out of the queue"
            );
        }
    }

    /// Start one more worker if there is queued work and an unstarted slot
    ///
    /// Must be called while holding the assignment lock. Worker startup is
    /// deliberately gradual - one new worker per completion - so a large
    /// batch does not stampede the network with simultaneously-launching
    /// extractors.
    ///
    /// Returns true if a new worker was spawned.
    pub(crate) async fn maybe_start_additional_worker(&self, table: &mut WorkerTable) -> bool {
        let active = table
            .workers
            .values()
            .filter(|w| w.started && w.state != WorkerState::Terminated)
            .count();
        let queue_size = self.queue.size().await;

        if queue_size == 0 || active >= self.config.pool.worker_pool_size {
            return false;
        }

        let mut unstarted: Vec<WorkerId> = table
            .workers
            .values()
            .filter(|w| !w.started)
            .map(|w| w.id)
            .collect();
        unstarted.sort();

        let Some(next_id) = unstarted.first().copied() else {
            return false;
        };

        self.spawn_worker(table, next_id);
        tracing::info!(
            worker = %next_id,
            active = active + 1,
            pool_size = self.config.pool.worker_pool_size,
            queue_size,
            "Started additional worker"
        );
        true
    }

    /// Spawn the worker loop task for a slot and record its handle
    ///
    /// Must be called while holding the assignment lock.
    pub(crate) fn spawn_worker(&self, table: &mut WorkerTable, worker_id: WorkerId) {
        let Some(slot) = table.workers.get_mut(&worker_id) else {
            tracing::error!(worker = %worker_id, "Attempted to spawn unknown worker slot");
            return;
        };
        if slot.started {
            return;
        }

        let center = self.clone();
        slot.started = true;
        slot.handle = Some(tokio::spawn(async move {
            center.worker_loop(worker_id).await;
        }));
    }
}
