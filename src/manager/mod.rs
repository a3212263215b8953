//! Failover Manager
//!
//! Turns leadership into side effects. Two independent loops run side by
//! side, one owning the VIP and one owning the time-sync role. Each reacts
//! to leadership events and to a periodic tick, and each keeps its own view
//! of whether this node leads.
//!
//! Events are a hint, not the source of truth: every tick compares the
//! loop's view against [`Consensus::state`] and replays the missed
//! transition, so a dropped or duplicated event never leaves the node in
//! the wrong state for longer than one tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::consensus::Consensus;
use crate::metrics::Metrics;
use crate::network::NetworkManager;
use crate::timesync::TimeSyncManager;

mod timesync;
mod vip;


use timesync::TimeSyncLoop;
use vip::VipLoop;

/// Owner of the VIP and time-sync control loops
pub struct Manager {
    consensus: Arc<dyn Consensus>,
    network: Arc<dyn NetworkManager>,
    timesync: Arc<dyn TimeSyncManager>,
    tick_interval: Duration,
    metrics: Arc<Metrics>,
    span: Span,
    stop_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(
        consensus: Arc<dyn Consensus>,
        network: Arc<dyn NetworkManager>,
        timesync: Arc<dyn TimeSyncManager>,
        tick_interval: Duration,
        metrics: Arc<Metrics>,
        span: Span,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            consensus,
            network,
            timesync,
            tick_interval,
            metrics,
            span,
            stop_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn both loops. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() || *self.stop_tx.borrow() {
            warn!(parent: &self.span, "manager already started");
            return;
        }

        let vip = VipLoop::new(
            self.consensus.clone(),
            self.network.clone(),
            self.metrics.clone(),
            self.tick_interval,
        );
        handles.push(tokio::spawn(
            vip.run(self.consensus.subscribe(), self.stop_tx.subscribe())
                .instrument(info_span!(parent: &self.span, "vip", ip = %self.network.address())),
        ));

        let timesync = TimeSyncLoop::new(
            self.consensus.clone(),
            self.timesync.clone(),
            self.metrics.clone(),
            self.tick_interval,
        );
        handles.push(tokio::spawn(
            timesync
                .run(self.consensus.subscribe(), self.stop_tx.subscribe())
                .instrument(info_span!(parent: &self.span, "timesync")),
        ));

        info!(
            parent: &self.span,
            tick = ?self.tick_interval,
            link = %self.network.interface(),
            "manager started"
        );
    }

    /// Signal both loops and wait until each has finished its cleanup.
    ///
    /// When this returns the VIP has been released if this node held it.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(parent: &self.span, error = %e, "manager loop failed");
            }
        }
        info!(parent: &self.span, "manager stopped");
    }
}
