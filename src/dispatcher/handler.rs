use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::dispatcher::job::Job;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Reacts to jobs reaching the committed state.
///
/// Called once per committed job, after the dispatcher has stored the merged
/// job. A failure here never undoes the commit.
pub trait CommitHandler: Send + Sync {
    fn job_committed(&self, job: &Job) -> Result<(), HandlerError>;
}

impl<F, E> CommitHandler for F
where
    F: Fn(&Job) -> Result<(), E> + Send + Sync,
    E: Into<HandlerError>,
{
    fn job_committed(&self, job: &Job) -> Result<(), HandlerError> {
        self(job).map_err(Into::into)
    }
}

/// Ignores committed jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCommitHandler;

impl CommitHandler for NoopCommitHandler {
    fn job_committed(&self, _job: &Job) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Logs every committed job.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCommitHandler;

impl CommitHandler for LogCommitHandler {
    fn job_committed(&self, job: &Job) -> Result<(), HandlerError> {
        tracing::info!(job_id = job.id(), job = %job, "Job committed");
        Ok(())
    }
}

/// Appends every committed job to a file, one JSON object per line.
///
/// Each line is written and flushed synchronously on the committing task.
#[derive(Debug)]
pub struct JsonLinesCommitHandler {
    file: Mutex<File>,
}

impl JsonLinesCommitHandler {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl CommitHandler for JsonLinesCommitHandler {
    fn job_committed(&self, job: &Job) -> Result<(), HandlerError> {
        let line = job.to_json()?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| "results file lock poisoned".to_string())?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}
