//! The long-lived worker loop and per-task processing.
//!
//! Each worker runs until shutdown: it processes whatever task is sitting
//! in its slot (assigned either by itself or by the completion path of its
//! previous task), otherwise it takes the assignment lock and tries to pull
//! work from the queue, sleeping briefly when none exists. Extraction runs
//! entirely outside the assignment lock.

use crate::progress::{CancelProbe, ProgressSink};
use crate::scraper::ScraperContext;
use crate::types::{ScrapeResult, ScrapeTask, WorkerId, WorkerState};

use super::ControlCenter;

impl ControlCenter {
    /// Main loop for one worker
    pub(crate) async fn worker_loop(&self, worker_id: WorkerId) {
        tracing::info!(worker = %worker_id, "Worker started");

        loop {
            if self.pool.shutdown.is_cancelled() {
                tracing::info!(worker = %worker_id, "Shutdown signaled, stopping worker");
                break;
            }

            // The completion handler assigns the next task directly into
            // the slot, so check for held work before touching the queue
            let current = {
                let table = self.pool.assignment.lock().await;
                table
                    .workers
                    .get(&worker_id)
                    .and_then(|slot| slot.current_task.clone())
            };

            if let Some(task) = current {
                let result = if self.aggregator.is_batch_cancelled(&task.batch_id).await {
                    tracing::info!(
                        worker = %worker_id,
                        task_id = %task.task_id,
                        batch_id = %task.batch_id,
                        "Batch cancelled; failing task without extraction"
                    );
                    ScrapeResult::failed(&task, "Cancelled by user")
                } else {
                    self.process_task(worker_id, &task).await
                };

                self.complete_and_reassign(worker_id, &task, result).await;
                continue;
            }

            // Idle: try to self-assign under the lock
            let assigned = {
                let mut table = self.pool.assignment.lock().await;
                self.dequeue_and_assign(&mut table, worker_id).await.is_some()
            };

            if !assigned {
                tokio::time::sleep(self.config.pool.idle_poll_interval()).await;
            }
        }

        let mut table = self.pool.assignment.lock().await;
        if let Some(slot) = table.workers.get_mut(&worker_id) {
            slot.state = WorkerState::Terminated;
            slot.current_task = None;
        }
        tracing::info!(worker = %worker_id, "Worker terminated");
    }

    /// Run one task through its extractor
    ///
    /// Long-running; must never be called while holding the assignment
    /// lock. Emits `scraping:start_link`, constructs the scraper, runs the
    /// extraction, and releases the scraper in both outcomes. Extractor
    /// errors are synthesized into failed results rather than propagated.
    pub(crate) async fn process_task(&self, worker_id: WorkerId, task: &ScrapeTask) -> ScrapeResult {
        self.aggregator
            .mark_link_started(
                &task.batch_id,
                &task.link_id,
                &task.url,
                task.scraper_type,
                worker_id,
            )
            .await;

        let context = ScraperContext {
            progress: ProgressSink::new(self.aggregator.clone(), task, worker_id),
            cancel: CancelProbe::new(
                self.pool.shutdown.clone(),
                self.aggregator.clone(),
                task.batch_id.clone(),
            ),
            options: self.config.scrapers.options_for(task.scraper_type),
        };

        let scraper = match self.factory.create(task.scraper_type, context) {
            Ok(scraper) => scraper,
            Err(e) => {
                tracing::error!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    scraper = %task.scraper_type,
                    error = %e,
                    "Failed to construct scraper; failing task"
                );
                return ScrapeResult::failed(task, e.to_string());
            }
        };

        tracing::info!(
            worker = %worker_id,
            task_id = %task.task_id,
            link_id = %task.link_id,
            url = %task.url,
            scraper = %task.scraper_type,
            "Processing task"
        );

        let result = match scraper
            .extract(&task.url, &task.batch_id, &task.link_id)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    worker = %worker_id,
                    task_id = %task.task_id,
                    error = %e,
                    "Extractor returned an error; synthesizing failure"
                );
                ScrapeResult::failed(task, e.to_string())
            }
        };

        // Guaranteed release, success or failure
        scraper.close().await;

        tracing::info!(
            worker = %worker_id,
            task_id = %task.task_id,
            success = result.success,
            word_count = result.word_count,
            "Extraction returned"
        );

        result
    }
}
