//! Wiring of collector and HTTP server into one running agent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collector::{Collector, ProcfsSampler};
use crate::config::Config;
use crate::server::{AppState, Server};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A bound but not yet running agent.
///
/// Building binds the listen socket before any task is spawned, so a
/// failed bind leaves nothing behind to clean up.
pub struct Agent {
    collector: Arc<Collector>,
    server: Server,
}

impl Agent {
    pub async fn build(config: &Config) -> Result<Self> {
        let registry = Registry::new();
        let sampler = ProcfsSampler::new(&config.collector);
        let collector = Arc::new(Collector::new(sampler, config.collector.interval(), &registry)?);

        let server = Server::bind(
            config.listen_addr()?,
            AppState { collector: Arc::clone(&collector), registry },
        )
        .await?;

        Ok(Self { collector, server })
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Run until `shutdown` fires or the server exits on its own, then stop
    /// both halves within the grace period.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self { collector, server } = self;

        collector.start(shutdown.clone())?;
        let mut server_task = tokio::spawn(server.serve(shutdown.clone()));

        let served = tokio::select! {
            res = &mut server_task => Some(res),
            _ = shutdown.cancelled() => None,
        };
        shutdown.cancel();

        let result = match served {
            Some(res) => res?,
            None => match tokio::time::timeout(SHUTDOWN_GRACE, server_task).await {
                Ok(res) => res?,
                Err(_) => {
                    warn!("HTTP server did not stop within grace period");
                    Ok(())
                }
            },
        };

        if tokio::time::timeout(SHUTDOWN_GRACE, collector.stop()).await.is_err() {
            warn!("Collector did not stop within grace period");
        }

        result
    }
}
