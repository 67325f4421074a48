use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::dispatcher::job::Job;
use crate::error::{DispatchError, Result};

/// Selects one of the three id queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Waiting,
    Running,
    Committed,
}

/// Size of each queue at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub running: usize,
    pub committed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.running + self.committed
    }
}

impl std::fmt::Display for QueueCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.waiting, self.running, self.committed)
    }
}

impl std::str::FromStr for QueueCounts {
    type Err = DispatchError;

    /// Parse the `waiting/running/committed` status line.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = || DispatchError::MalformedPayload(format!("invalid status line '{}'", s));
        let mut parts = s.trim().split('/').map(|p| p.parse::<usize>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(waiting)), Some(Ok(running)), Some(Ok(committed)), None) => Ok(Self {
                waiting,
                running,
                committed,
            }),
            _ => Err(malformed()),
        }
    }
}

/// Job store and lifecycle queues.
///
/// Every known id is a key of `jobs` and sits in exactly one of `waiting`,
/// `running` or `committed`. Jobs are never removed. This type does no
/// locking; [`Dispatcher`](crate::dispatcher::Dispatcher) serializes access.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: HashMap<u64, Job>,
    waiting: VecDeque<u64>,
    running: Vec<u64>,
    committed: Vec<u64>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new job and append it to the waiting queue.
    pub fn enqueue(&mut self, mut job: Job) -> Result<()> {
        let id = job.id();
        if self.jobs.contains_key(&id) {
            return Err(DispatchError::DuplicateJobId(id));
        }
        job.mark_enqueued(Utc::now());
        self.jobs.insert(id, job);
        self.waiting.push_back(id);
        Ok(())
    }

    /// Move the oldest waiting job to running and return a copy of it.
    pub fn dequeue(&mut self) -> Option<Job> {
        let id = self.waiting.pop_front()?;
        let Some(job) = self.jobs.get_mut(&id) else {
            // unreachable while the store invariant holds
            tracing::error!(job_id = id, "Waiting id missing from the job store");
            return None;
        };
        job.mark_dequeued(Utc::now());
        self.running.push(id);
        Some(job.clone())
    }

    /// Merge `update` into the running job with the same id and move it to
    /// committed. Returns a copy of the stored job after the merge.
    ///
    /// Fails without touching any state when the id is unknown or the job
    /// is not running.
    pub fn commit(&mut self, update: &Job) -> Result<Job> {
        let id = update.id();
        let pos = self
            .running
            .iter()
            .position(|&r| r == id)
            .ok_or(DispatchError::UnknownOrNotRunningJob(id))?;
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or(DispatchError::UnknownOrNotRunningJob(id))?;

        job.merge_fields(update);
        job.mark_committed(Utc::now());
        self.running.remove(pos);
        self.committed.push(id);
        Ok(job.clone())
    }

    pub fn get_job(&self, id: u64) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Copy of the ids currently in the selected queue, in queue order.
    pub fn snapshot(&self, kind: QueueKind) -> Vec<u64> {
        match kind {
            QueueKind::Waiting => self.waiting.iter().copied().collect(),
            QueueKind::Running => self.running.clone(),
            QueueKind::Committed => self.committed.clone(),
        }
    }

    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.waiting.len(),
            running: self.running.len(),
            committed: self.committed.len(),
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Number of jobs ever enqueued.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
