//! Authoritative task state tracking.
//!
//! The tracker owns the `task_id → record` mapping; the queue and workers
//! only hold snapshots. All mutations go through a single mutex so status
//! and side fields change together, and terminal statuses are sticky: once
//! a task is completed, failed, or cancelled its status never changes
//! again (side fields may still be written for diagnostics).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::{ScrapeResult, ScrapeTask, TaskId, TaskStatus, TrackerStats, WorkerId};

/// Optional side fields applied together with a status transition
#[derive(Debug, Default)]
pub struct TaskUpdate {
    /// Set (or clear) the assigned worker
    pub assigned_worker_id: Option<Option<WorkerId>>,
    /// Set the start timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// Set the terminal timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Store the extraction result
    pub result: Option<ScrapeResult>,
    /// Store the error string
    pub error: Option<String>,
}

/// Thread-safe mapping from task id to task record
pub struct StateTracker {
    tasks: Mutex<HashMap<TaskId, ScrapeTask>>,
}

impl StateTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Add a task to the tracker
    ///
    /// Returns false (and leaves the existing record untouched) if a task
    /// with the same id is already tracked — first write wins.
    pub async fn add(&self, task: ScrapeTask) -> bool {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.task_id) {
            tracing::warn!(
                task_id = %task.task_id,
                link_id = %task.link_id,
                "Duplicate task id ignored by tracker"
            );
            return false;
        }
        tasks.insert(task.task_id.clone(), task);
        true
    }

    /// Atomically update a task's status and side fields
    ///
    /// Terminal-idempotent: when the current status is already terminal the
    /// status field is left unchanged (side fields still apply). Returns
    /// whether the status transition was applied.
    pub async fn update_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        update: TaskUpdate,
    ) -> bool {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(task_id) else {
            tracing::warn!(task_id = %task_id, "Status update for untracked task ignored");
            return false;
        };

        let applied = if task.status.is_terminal() {
            tracing::debug!(
                task_id = %task_id,
                current = ?task.status,
                requested = ?status,
                "Terminal status is sticky; keeping current status"
            );
            false
        } else {
            task.status = status;
            true
        };

        if let Some(worker) = update.assigned_worker_id {
            task.assigned_worker_id = worker;
        }
        if let Some(started) = update.started_at {
            task.started_at = Some(started);
        }
        if let Some(completed) = update.completed_at {
            task.completed_at = Some(completed);
        }
        if let Some(result) = update.result {
            task.result = Some(result);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }

        applied
    }

    /// Snapshot of one task record
    pub async fn get(&self, task_id: &TaskId) -> Option<ScrapeTask> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    /// Current status of one task, cheaper than a full snapshot
    pub async fn status_of(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks.lock().await.get(task_id).map(|t| t.status)
    }

    /// Snapshots of all tracked tasks
    pub async fn all_tasks(&self) -> Vec<ScrapeTask> {
        self.tasks.lock().await.values().cloned().collect()
    }

    /// Status counts across all tracked tasks
    pub async fn statistics(&self) -> TrackerStats {
        let tasks = self.tasks.lock().await;
        let mut stats = TrackerStats {
            total: tasks.len(),
            ..TrackerStats::default()
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
