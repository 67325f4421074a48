//! The job dispatcher core.
//!
//! - [`Job`]: identifier, flat string payload and lifecycle timestamps
//! - [`JobQueue`]: job store plus the waiting/running/committed id queues
//! - [`Dispatcher`]: shares a [`JobQueue`] between concurrent callers and
//!   notifies the [`CommitHandler`] of every committed job
//!
//! Jobs move `waiting -> running -> committed` and never go back. A job
//! that is dequeued and never committed stays running.

pub mod handler;
pub mod job;
pub mod queue;

pub use handler::{CommitHandler, JsonLinesCommitHandler, LogCommitHandler, NoopCommitHandler};
pub use job::{Job, JobStatus};
pub use queue::{JobQueue, QueueCounts, QueueKind};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{DispatchError, Result};

/// Every job known to a dispatcher, read under a single lock.
#[derive(Debug, Clone, Default)]
pub struct Overview {
    pub waiting: Vec<Job>,
    pub running: Vec<Job>,
    pub committed: Vec<Job>,
}

impl Overview {
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.waiting.len(),
            running: self.running.len(),
            committed: self.committed.len(),
        }
    }
}

/// Thread-safe owner of job identity and lifecycle.
///
/// One lock guards the store and the three queues, so every operation is
/// observed as a single step by the others.
pub struct Dispatcher {
    queue: RwLock<JobQueue>,
    next_id: AtomicU64,
    commit_handler: Arc<dyn CommitHandler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(NoopCommitHandler)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(commit_handler: impl CommitHandler + 'static) -> Self {
        Self::with_handler(Arc::new(commit_handler))
    }

    pub fn with_handler(commit_handler: Arc<dyn CommitHandler>) -> Self {
        Self {
            queue: RwLock::new(JobQueue::new()),
            next_id: AtomicU64::new(0),
            commit_handler,
        }
    }

    /// Hand out the next id of the internal counter. The counter does not
    /// know about ids chosen by the producer.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue a job whose id was chosen by the producer.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let id = job.id();
        let result = self.queue.write().await.enqueue(job);
        match &result {
            Ok(()) => tracing::debug!(job_id = id, "Job enqueued"),
            Err(e) => tracing::warn!(job_id = id, error = %e, "Enqueue rejected"),
        }
        result
    }

    /// Enqueue every job in order, skipping ids already known.
    /// Returns the number of jobs enqueued.
    pub async fn enqueue_all(&self, jobs: impl IntoIterator<Item = Job>) -> usize {
        let mut enqueued = 0;
        for job in jobs {
            // rejections are logged by enqueue
            if self.enqueue(job).await.is_ok() {
                enqueued += 1;
            }
        }
        enqueued
    }

    /// Allocate a fresh id, enqueue a job with `fields` and return the id.
    pub async fn submit(&self, fields: BTreeMap<String, String>) -> u64 {
        let mut queue = self.queue.write().await;
        let mut id = self.next_id();
        while queue.contains(id) {
            id = self.next_id();
        }
        // the id is free and the lock is held
        if let Err(e) = queue.enqueue(Job::with_fields(id, fields)) {
            tracing::error!(job_id = id, error = %e, "Submit failed on a free id");
        }
        tracing::debug!(job_id = id, "Job submitted");
        id
    }

    /// Claim the oldest waiting job. `None` means there is no work.
    pub async fn dequeue(&self) -> Option<Job> {
        let job = self.queue.write().await.dequeue();
        if let Some(ref job) = job {
            tracing::info!(job_id = job.id(), "Job dequeued");
        }
        job
    }

    /// Commit a running job with the fields computed by its worker.
    ///
    /// Returns the stored job after the merge. The commit handler runs
    /// after the lock is released; its failure is reported as
    /// [`DispatchError::CallbackFailure`] while the job stays committed.
    pub async fn commit(&self, update: &Job) -> Result<Job> {
        let committed = {
            let mut queue = self.queue.write().await;
            queue.commit(update)
        };
        let job = match committed {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = update.id(), error = %e, "Commit rejected");
                return Err(e);
            }
        };
        tracing::info!(job_id = job.id(), "Job committed");

        if let Err(e) = self.commit_handler.job_committed(&job) {
            tracing::error!(job_id = job.id(), error = %e, "Commit handler failed");
            return Err(DispatchError::CallbackFailure {
                job_id: job.id(),
                message: e.to_string(),
            });
        }
        Ok(job)
    }

    /// Current state of a job, whatever queue it is in.
    pub async fn get_job(&self, id: u64) -> Option<Job> {
        self.queue.read().await.get_job(id).cloned()
    }

    /// Copy of the ids in one queue, in queue order.
    pub async fn snapshot(&self, kind: QueueKind) -> Vec<u64> {
        self.queue.read().await.snapshot(kind)
    }

    pub async fn counts(&self) -> QueueCounts {
        self.queue.read().await.counts()
    }

    pub async fn overview(&self) -> Overview {
        let queue = self.queue.read().await;
        let collect = |kind: QueueKind| -> Vec<Job> {
            queue
                .snapshot(kind)
                .into_iter()
                .filter_map(|id| queue.get_job(id).cloned())
                .collect()
        };
        Overview {
            waiting: collect(QueueKind::Waiting),
            running: collect(QueueKind::Running),
            committed: collect(QueueKind::Committed),
        }
    }
}

/// Enqueue the jobs of a JSON array of wire jobs, as read from a jobs file.
///
/// Duplicate ids are skipped. Returns the number of jobs enqueued; a
/// document that is not an array of jobs is rejected before any enqueue.
pub async fn load_jobs(dispatcher: &Dispatcher, json: &str) -> Result<usize> {
    let jobs: Vec<Job> =
        serde_json::from_str(json).map_err(|e| DispatchError::MalformedPayload(e.to_string()))?;
    let total = jobs.len();
    let loaded = dispatcher.enqueue_all(jobs).await;
    if loaded < total {
        tracing::warn!(skipped = total - loaded, "Duplicate jobs skipped");
    }
    Ok(loaded)
}
