//! Worker side of the dispatcher protocol.
//!
//! - [`DispatcherClient`]: HTTP client with a bounded resource cache
//! - [`Executor`] / [`ShellExecutor`]: turn a dequeued job into a result
//! - [`Worker`]: the dequeue -> execute -> commit loop
//!
//! A worker that dies between dequeue and commit leaves its job running on
//! the dispatcher; nothing reassigns it.

pub mod cache;
pub mod client;
pub mod executor;

pub use cache::ResourceCache;
pub use client::DispatcherClient;
pub use executor::{Executor, ShellExecutor};

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// What a worker loop did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub committed: usize,
    pub rejected: usize,
}

pub struct Worker<E> {
    client: DispatcherClient,
    executor: E,
    config: WorkerConfig,
}

impl<E: Executor> Worker<E> {
    pub fn new(config: WorkerConfig, executor: E) -> Self {
        Self {
            client: DispatcherClient::new(&config),
            executor,
            config,
        }
    }

    pub fn client(&self) -> &DispatcherClient {
        &self.client
    }

    /// Pull, execute and commit jobs until `shutdown` is cancelled, or until
    /// the dispatcher runs out of work when `exit_when_idle` is set.
    ///
    /// A rejected commit is logged and counted; transport errors end the loop.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<WorkerStats, WorkerError> {
        let mut stats = WorkerStats::default();
        tracing::info!(dispatcher = self.client.base_url(), "Worker started");

        while !shutdown.is_cancelled() {
            let job = match self.client.dequeue().await? {
                Some(job) => job,
                None => {
                    if self.config.exit_when_idle {
                        tracing::info!("No more waiting jobs, worker exiting");
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                }
            };

            let id = job.id();
            let done = self.executor.execute(job).await;
            match self.client.commit(&done).await {
                Ok(()) => stats.committed += 1,
                Err(WorkerError::Rejected { job_id, message }) => {
                    tracing::warn!(job_id, detail = %message, "Commit rejected");
                    stats.rejected += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = id, error = %e, "Commit failed");
                    return Err(e);
                }
            }
        }

        tracing::info!(
            committed = stats.committed,
            rejected = stats.rejected,
            "Worker stopped"
        );
        Ok(stats)
    }
}
