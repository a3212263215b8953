//! Service wiring
//!
//! Startup order is side-effect adapters, metrics, consensus, manager. Any
//! failure before the manager starts is fatal. Shutdown runs the other way:
//! the manager releases what it holds before consensus stops.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{info, info_span, warn};

use crate::config::{Config, ConfigError};
use crate::consensus::{ConsensusError, RaftNode};
use crate::exec::{CommandRunner, SystemRunner};
use crate::manager::Manager;
use crate::metrics::{Metrics, MetricsServer};
use crate::network::{NetworkError, VipLink};
use crate::timesync::{Chrony, TimeSyncError};

/// Fatal startup failures
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up VIP: {0}")]
    Network(#[from] NetworkError),

    #[error("failed to set up time sync: {0}")]
    TimeSync(#[from] TimeSyncError),

    #[error("failed to bootstrap consensus: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to bind metrics endpoint {addr}: {source}")]
    MetricsBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// SIGINT or SIGTERM, whichever comes first
struct Shutdown {
    terminate: Signal,
}

impl Shutdown {
    fn install() -> Result<Self, ServeError> {
        let terminate = signal(SignalKind::terminate()).map_err(ServeError::Signal)?;
        Ok(Self { terminate })
    }

    async fn wait(&mut self) -> &'static str {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for SIGINT");
                }
                "SIGINT"
            }
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Run the failover service until SIGINT or SIGTERM
pub async fn serve(config: Config) -> Result<(), ServeError> {
    config.validate()?;
    let node_id = config.raft.node_id();
    let span = info_span!("floatd", node_id = %node_id);
    let mut shutdown = Shutdown::install()?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let network = Arc::new(VipLink::from_config(&config.network, runner.clone()).await?);
    let timesync = Arc::new(Chrony::new(&config.ntp, runner)?);

    let metrics = Arc::new(Metrics::new()?);
    let metrics_task = if config.metrics.enabled {
        let addr = config.metrics.bind;
        let server = MetricsServer::bind(metrics.clone(), addr)
            .await
            .map_err(|source| ServeError::MetricsBind { addr, source })?;
        Some(tokio::spawn(server.run()))
    } else {
        None
    };

    let node = Arc::new(RaftNode::bootstrap(&config.raft, config.fingerprint()).await?);

    let manager = Manager::new(
        node.clone(),
        network,
        timesync,
        config.manager.tick_interval,
        metrics,
        span.clone(),
    );
    manager.start();
    info!(
        parent: &span,
        vip = %config.network.vip,
        link = %config.network.interface,
        mode = %config.ntp.mode,
        "floatd running"
    );

    let received = shutdown.wait().await;
    info!(parent: &span, signal = received, "shutting down");

    manager.stop().await;
    node.shutdown().await;
    if let Some(task) = metrics_task {
        task.abort();
    }

    info!(parent: &span, "shutdown complete");
    Ok(())
}
