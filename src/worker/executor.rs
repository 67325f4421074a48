use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;

use crate::dispatcher::Job;

pub const COMMAND_KEY: &str = "command";
pub const OUTPUT_KEY: &str = "output";
pub const ERROR_KEY: &str = "error";
pub const EXIT_CODE_KEY: &str = "exit_code";

/// Computes the result fields of a dequeued job.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> impl Future<Output = Job> + Send;
}

impl<F, Fut> Executor for F
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Job> + Send,
{
    fn execute(&self, job: Job) -> impl Future<Output = Job> + Send {
        self(job)
    }
}

/// Runs the job's `command` field with `sh -c`.
///
/// Writes back `exit_code`, `output` (stdout, when not empty) and `error`
/// (stderr or the spawn failure, when the command did not succeed).
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub async fn run(&self, mut job: Job) -> Job {
        let Some(command) = job.get(COMMAND_KEY).map(str::to_owned) else {
            tracing::warn!(job_id = job.id(), "Job has no command field");
            job.put(ERROR_KEY, format!("missing '{}' field", COMMAND_KEY));
            return job;
        };

        tracing::info!(job_id = job.id(), command = %command, "Executing job");
        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(&mut job, result);
        job
    }

    fn process_output(job: &mut Job, result: Result<std::process::Output, std::io::Error>) {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                if let Some(code) = exit_code {
                    job.put(EXIT_CODE_KEY, code.to_string());
                }
                if !stdout.is_empty() {
                    job.put(OUTPUT_KEY, stdout);
                }
                if !output.status.success() {
                    let error = if stderr.is_empty() {
                        format!("Exit code: {:?}", exit_code)
                    } else {
                        stderr
                    };
                    job.put(ERROR_KEY, error);
                }

                tracing::info!(
                    job_id = job.id(),
                    exit_code = ?exit_code,
                    "Job executed"
                );
            }
            Err(e) => {
                tracing::error!(job_id = job.id(), error = %e, "Job execution failed");
                job.put(ERROR_KEY, e.to_string());
            }
        }
    }
}

impl Executor for ShellExecutor {
    fn execute(&self, job: Job) -> impl Future<Output = Job> + Send {
        self.run(job)
    }
}
