use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;
use crate::protocol::{self, AppState};

/// HTTP front of a [`Dispatcher`].
pub struct DispatcherServer {
    pub config: DispatcherConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: CancellationToken,
}

impl DispatcherServer {
    pub fn new(
        config: DispatcherConfig,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            dispatcher,
            shutdown,
        }
    }

    pub fn router(&self) -> Router {
        protocol::router(
            AppState::new(self.dispatcher.clone(), self.shutdown.clone()),
            self.config.resource_root.as_deref(),
        )
    }

    /// Bind the configured address and serve until shut down.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token is
    /// cancelled, then drain in-flight requests for at most the configured
    /// timeout. Queue state is left as is.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr: SocketAddr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.clone();

        tracing::info!(
            addr = %addr,
            resource_root = ?self.config.resource_root,
            "Dispatcher started"
        );

        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });

        let drain_timeout = self.config.shutdown_timeout;
        let shutdown = self.shutdown.clone();
        let result = tokio::select! {
            joined = &mut server => joined,
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                tracing::warn!(timeout = ?drain_timeout, "Graceful shutdown timed out");
                server.abort();
                Ok(Ok(()))
            }
        };

        tracing::info!(addr = %addr, "Dispatcher stopped");
        match result {
            Ok(served) => served,
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
        }
    }
}
