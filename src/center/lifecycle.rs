//! Startup and shutdown coordination.

use std::time::Duration;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::types::{Event, WorkerId};

use super::{ControlCenter, WorkerSlot};

impl ControlCenter {
    /// Start the worker pool
    ///
    /// Creates every worker slot up front but spawns only the first worker
    /// thread of execution. Additional workers start gradually — one per
    /// observed completion while queued work remains — so a large batch
    /// ramps up instead of stampeding the network with simultaneously
    /// launching extractors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if called twice.
    pub async fn start(&self) -> Result<()> {
        {
            let mut times = self.pool.lifecycle.lock().await;
            if times.started_at.is_some() {
                tracing::warn!("Control center already started");
                return Err(Error::AlreadyStarted);
            }
            times.started_at = Some(Utc::now());
        }

        let pool_size = self.config.pool.worker_pool_size;
        let queue_size = self.queue.size().await;
        tracing::info!(pool_size, queue_size, "Starting control center");

        let mut table = self.pool.assignment.lock().await;
        for i in 1..=pool_size {
            let id = WorkerId(i as u32);
            table.workers.insert(id, WorkerSlot::new(id));
        }

        // Only the first worker spawns now; the rest stay unstarted until
        // completions observe queued work
        self.spawn_worker(&mut table, WorkerId(1));

        tracing::info!(
            active = 1,
            pool_size,
            "Control center started; remaining workers start on demand"
        );
        Ok(())
    }

    /// Gracefully shut down the control center
    ///
    /// Signals the shutdown token — workers notice at their next loop head
    /// and drain their current task first — then, if `wait` is set, joins
    /// each worker within the remaining portion of `timeout`. Emits a
    /// `shutdown` event for subscribers.
    pub async fn shutdown(&self, wait: bool, timeout: Duration) {
        tracing::info!("Shutting down control center");

        self.pool.shutdown.cancel();
        self.emit_event(Event::Shutdown);

        if wait {
            let handles: Vec<(WorkerId, tokio::task::JoinHandle<()>)> = {
                let mut table = self.pool.assignment.lock().await;
                table
                    .workers
                    .values_mut()
                    .filter_map(|slot| slot.handle.take().map(|h| (slot.id, h)))
                    .collect()
            };

            let deadline = tokio::time::Instant::now() + timeout;
            for (worker_id, handle) in handles {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    tracing::warn!(worker = %worker_id, "Worker did not terminate in time");
                    continue;
                }
                if tokio::time::timeout(remaining, handle).await.is_err() {
                    tracing::warn!(worker = %worker_id, "Worker did not terminate in time");
                }
            }
        }

        {
            let mut times = self.pool.lifecycle.lock().await;
            if times.ended_at.is_none() {
                times.ended_at = Some(Utc::now());
            }
        }

        tracing::info!("Control center shut down");
    }
}
