use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Port the dispatcher listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 6758;

/// Number of resources a worker keeps in memory.
pub const DEFAULT_CACHE_SIZE: usize = 200;

/// Configuration of the dispatcher HTTP server.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub listen_addr: SocketAddr,
    /// Directory served for every path other than `/`.
    /// When unset those paths are answered with 404.
    pub resource_root: Option<PathBuf>,
    /// Upper bound on draining in-flight requests once a stop is requested.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            resource_root: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl DispatcherConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = Some(root.into());
        self
    }
}

/// Configuration of a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the dispatcher, e.g. `http://127.0.0.1:6758`.
    pub dispatcher_url: String,
    /// Capacity of the resource cache. 0 disables caching.
    pub cache_size: usize,
    /// Pause between two dequeue attempts when no work is available.
    pub poll_interval: Duration,
    /// Stop the worker loop the first time no work is available.
    pub exit_when_idle: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dispatcher_url: format!("http://127.0.0.1:{}", DEFAULT_PORT),
            cache_size: DEFAULT_CACHE_SIZE,
            poll_interval: Duration::from_millis(500),
            exit_when_idle: false,
        }
    }
}

impl WorkerConfig {
    pub fn new(dispatcher_url: impl Into<String>) -> Self {
        Self {
            dispatcher_url: dispatcher_url.into(),
            ..Default::default()
        }
    }
}
