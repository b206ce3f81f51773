//! Unified task queue shared by all workers.
//!
//! The queue is a dumb FIFO container: it performs no status filtering of
//! its own. Validity checks happen at dequeue time in the worker's
//! assignment path, which is why [`TaskQueue::return_to_tail`] exists — a
//! worker that dequeues a task it cannot currently process (for example one
//! that another worker raced it to) yields it back to the tail.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::types::{QueueStats, ScrapeTask};

/// Thread-safe FIFO of pending tasks with add/processed accounting
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    queue: VecDeque<ScrapeTask>,
    total_added: u64,
    total_processed: u64,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                total_added: 0,
                total_processed: 0,
            }),
        }
    }

    /// Add a task to the tail of the queue
    pub async fn enqueue(&self, task: ScrapeTask) {
        let mut inner = self.inner.lock().await;
        inner.queue.push_back(task);
        inner.total_added += 1;
        tracing::debug!(queue_size = inner.queue.len(), "Task added to queue");
    }

    /// Add multiple tasks to the tail of the queue
    pub async fn enqueue_batch(&self, tasks: Vec<ScrapeTask>) {
        if tasks.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        let count = tasks.len();
        for task in tasks {
            inner.queue.push_back(task);
            inner.total_added += 1;
        }
        tracing::debug!(
            added = count,
            queue_size = inner.queue.len(),
            "Tasks added to queue"
        );
    }

    /// Pop the head of the queue without blocking
    ///
    /// Returns `None` when the queue is empty.
    pub async fn try_dequeue(&self) -> Option<ScrapeTask> {
        let mut inner = self.inner.lock().await;
        let task = inner.queue.pop_front();
        if task.is_some() {
            inner.total_processed += 1;
        }
        task
    }

    /// Return a previously-dequeued task to the tail of the queue
    ///
    /// This is a retraction of a prior dequeue, so the processed counter is
    /// decremented (saturating at zero).
    pub async fn return_to_tail(&self, task: ScrapeTask) {
        let mut inner = self.inner.lock().await;
        inner.queue.push_back(task);
        inner.total_processed = inner.total_processed.saturating_sub(1);
    }

    /// Drain every remaining item out of the queue
    ///
    /// Used by the assignment sweep to revalidate the whole queue in one
    /// pass. Each drained item counts as processed; items put back via
    /// [`TaskQueue::return_to_tail`] retract that.
    pub async fn drain_all(&self) -> Vec<ScrapeTask> {
        let mut inner = self.inner.lock().await;
        let drained: Vec<ScrapeTask> = inner.queue.drain(..).collect();
        inner.total_processed += drained.len() as u64;
        drained
    }

    /// Current number of queued tasks
    pub async fn size(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    /// Queue counters
    pub async fn statistics(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            queue_size: inner.queue.len(),
            total_added: inner.total_added,
            total_processed: inner.total_processed,
            pending: inner.total_added.saturating_sub(inner.total_processed),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScraperType;

    fn task(id: &str) -> ScrapeTask {
        ScrapeTask::new(id, "b1", id, "https://example.com", ScraperType::Article)
    }

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let queue = TaskQueue::new();
        queue.enqueue(task("t1")).await;
        queue.enqueue(task("t2")).await;
        queue.enqueue(task("t3")).await;

        assert_eq!(queue.try_dequeue().await.unwrap().task_id.as_str(), "t1");
        assert_eq!(queue.try_dequeue().await.unwrap().task_id.as_str(), "t2");
        assert_eq!(queue.try_dequeue().await.unwrap().task_id.as_str(), "t3");
        assert!(queue.try_dequeue().await.is_none());
    }

    #[tokio::test]
    async fn dequeue_on_empty_returns_none_without_counting() {
        let queue = TaskQueue::new();
        assert!(queue.try_dequeue().await.is_none());

        let stats = queue.statistics().await;
        assert_eq!(stats.total_processed, 0, "empty dequeue must not count");
    }

    #[tokio::test]
    async fn counters_track_added_and_processed() {
        let queue = TaskQueue::new();
        queue
            .enqueue_batch(vec![task("t1"), task("t2"), task("t3")])
            .await;

        let stats = queue.statistics().await;
        assert_eq!(stats.total_added, 3);
        assert_eq!(stats.pending, 3);

        queue.try_dequeue().await.unwrap();
        let stats = queue.statistics().await;
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.queue_size, 2);
    }

    #[tokio::test]
    async fn return_to_tail_retracts_processed_count_and_goes_last() {
        let queue = TaskQueue::new();
        queue.enqueue(task("t1")).await;
        queue.enqueue(task("t2")).await;

        let first = queue.try_dequeue().await.unwrap();
        assert_eq!(queue.statistics().await.total_processed, 1);

        queue.return_to_tail(first).await;
        let stats = queue.statistics().await;
        assert_eq!(stats.total_processed, 0, "return is a retraction");
        assert_eq!(stats.queue_size, 2);

        // The returned task goes to the tail, behind t2
        assert_eq!(queue.try_dequeue().await.unwrap().task_id.as_str(), "t2");
        assert_eq!(queue.try_dequeue().await.unwrap().task_id.as_str(), "t1");
    }

    #[tokio::test]
    async fn drain_all_empties_the_queue_in_order() {
        let queue = TaskQueue::new();
        queue
            .enqueue_batch(vec![task("t1"), task("t2"), task("t3")])
            .await;

        let drained = queue.drain_all().await;
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].task_id.as_str(), "t1");
        assert!(queue.is_empty().await);
        assert_eq!(queue.statistics().await.total_processed, 3);
    }

    #[tokio::test]
    async fn return_to_tail_processed_count_saturates_at_zero() {
        let queue = TaskQueue::new();
        queue.return_to_tail(task("t1")).await;

        let stats = queue.statistics().await;
        assert_eq!(stats.total_processed, 0, "counter must not underflow");
        assert_eq!(stats.queue_size, 1);
    }
}
