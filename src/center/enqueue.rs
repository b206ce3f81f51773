//! Task intake and validation.

use crate::error::{Error, Result};
use crate::types::ScrapeTask;

use super::ControlCenter;

impl ControlCenter {
    /// Add a task to the tracker and, if it is still live, to the queue
    ///
    /// Tasks that arrive already terminal are recorded in the tracker for
    /// reporting and deduplication but refused into the queue — workers
    /// must never observe them, so no progress or completion event is ever
    /// produced for them. A task whose id is already tracked is likewise
    /// not enqueued again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has been signaled.
    pub async fn add_task(&self, task: ScrapeTask) -> Result<()> {
        if self.pool.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        if task.status.is_terminal() {
            tracing::warn!(
                task_id = %task.task_id,
                link_id = %task.link_id,
                status = ?task.status,
                "Skipping task - status is terminal, not pending"
            );
            self.tracker.add(task).await;
            return Ok(());
        }

        if !self.tracker.add(task.clone()).await {
            // Duplicate id: the tracker kept the first record; enqueueing
            // this copy would double-process the task
            return Ok(());
        }

        self.queue.enqueue(task).await;
        Ok(())
    }

    /// Add multiple tasks
    ///
    /// Each task goes through the same validation as
    /// [`ControlCenter::add_task`].
    pub async fn add_tasks(&self, tasks: Vec<ScrapeTask>) -> Result<()> {
        for task in tasks {
            self.add_task(task).await?;
        }
        Ok(())
    }
}
