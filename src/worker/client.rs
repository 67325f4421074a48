use std::io::Write;

use reqwest::{header, StatusCode};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::config::WorkerConfig;
use crate::dispatcher::{Job, QueueCounts};
use crate::error::WorkerError;
use crate::protocol::{
    ACTION_COMMIT, ACTION_DEQUEUE, ACTION_STATUS, ACTION_STOP, PARAM_ACTION, PARAM_JOB,
};
use crate::worker::cache::ResourceCache;

pub type Result<T> = std::result::Result<T, WorkerError>;

/// HTTP client of a dispatcher, as used by workers.
///
/// Resources fetched with [`resource`](Self::resource) are kept in a bounded
/// cache; jobs are never cached.
#[derive(Debug)]
pub struct DispatcherClient {
    http: reqwest::Client,
    base_url: String,
    cache: Mutex<ResourceCache>,
}

impl DispatcherClient {
    pub fn new(config: &WorkerConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &WorkerConfig) -> Self {
        Self {
            http,
            base_url: config.dispatcher_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(ResourceCache::new(config.cache_size)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn root_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    /// Claim the next waiting job. `None` when the dispatcher has no work.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        let url = self.root_url();
        let resp = self
            .http
            .get(&url)
            .query(&[(PARAM_ACTION, ACTION_DEQUEUE)])
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp.text().await?;
                Ok(Some(Job::from_json(&body)?))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => Err(unexpected(status, resp.url().as_str())),
        }
    }

    /// Return a computed job to the dispatcher.
    ///
    /// A commit accepted with a failing commit handler on the dispatcher side
    /// still counts as done and is only logged.
    pub async fn commit(&self, job: &Job) -> Result<()> {
        let body = job.to_json()?;
        let id = job.id().to_string();
        let resp = self
            .http
            .post(self.root_url())
            .query(&[(PARAM_ACTION, ACTION_COMMIT), (PARAM_JOB, id.as_str())])
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::ACCEPTED => {
                let message = resp.text().await.unwrap_or_default();
                tracing::warn!(
                    job_id = job.id(),
                    detail = %message,
                    "Job committed with a handler failure"
                );
                Ok(())
            }
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => Err(WorkerError::Rejected {
                job_id: job.id(),
                message: resp.text().await.unwrap_or_default(),
            }),
            status => Err(unexpected(status, resp.url().as_str())),
        }
    }

    pub async fn status(&self) -> Result<QueueCounts> {
        let resp = self
            .http
            .get(self.root_url())
            .query(&[(PARAM_ACTION, ACTION_STATUS)])
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(unexpected(resp.status(), resp.url().as_str()));
        }
        Ok(resp.text().await?.parse::<QueueCounts>()?)
    }

    /// Current state of a job, `None` if the dispatcher does not know it.
    pub async fn job(&self, id: u64) -> Result<Option<Job>> {
        let id = id.to_string();
        let resp = self
            .http
            .get(self.root_url())
            .query(&[(PARAM_JOB, id.as_str())])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(Some(Job::from_json(&resp.text().await?)?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(status, resp.url().as_str())),
        }
    }

    /// Ask the dispatcher to shut down.
    pub async fn stop(&self) -> Result<()> {
        let resp = self
            .http
            .get(self.root_url())
            .query(&[(PARAM_ACTION, ACTION_STOP)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            status => Err(unexpected(status, resp.url().as_str())),
        }
    }

    /// Fetch a static resource, going through the cache.
    /// `None` when the dispatcher does not have it.
    pub async fn resource(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let key = path.trim_start_matches('/');
        if let Some(content) = self.cache.lock().await.get(key) {
            return Ok(Some(content.to_vec()));
        }

        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, key))
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => {
                let content = resp.bytes().await?.to_vec();
                self.cache.lock().await.insert(key, content.clone());
                Ok(Some(content))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status => Err(unexpected(status, resp.url().as_str())),
        }
    }

    pub async fn resource_as_string(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .resource(path)
            .await?
            .map(|content| String::from_utf8_lossy(&content).into_owned()))
    }

    /// Copy a resource into a fresh temporary file whose name ends with the
    /// resource's file name. The file is removed when the handle is dropped.
    pub async fn store_resource(&self, path: &str) -> Result<Option<NamedTempFile>> {
        let Some(content) = self.resource(path).await? else {
            return Ok(None);
        };
        let name = path.rsplit('/').next().unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix("vjob")
            .suffix(name)
            .tempfile()?;
        file.write_all(&content)?;
        file.flush()?;
        Ok(Some(file))
    }

    pub async fn flush_cache(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn cached_resources(&self) -> usize {
        self.cache.lock().await.len()
    }
}

fn unexpected(status: StatusCode, uri: &str) -> WorkerError {
    WorkerError::UnexpectedStatus {
        status: status.as_u16(),
        uri: uri.to_string(),
    }
}
