//! Time-sync control loop

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::addr::split_host;
use crate::consensus::{Consensus, LeadershipEvent};
use crate::metrics::{Metrics, ROLE_FOLLOWER, ROLE_LEADER};
use crate::timesync::TimeSyncManager;

/// What the daemon was last successfully configured as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Configured {
    Unconfigured,
    Leader,
    Follower(IpAddr),
}

pub(super) struct TimeSyncLoop {
    consensus: Arc<dyn Consensus>,
    timesync: Arc<dyn TimeSyncManager>,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
    is_leader: bool,
    configured: Configured,
}

impl TimeSyncLoop {
    pub(super) fn new(
        consensus: Arc<dyn Consensus>,
        timesync: Arc<dyn TimeSyncManager>,
        metrics: Arc<Metrics>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            consensus,
            timesync,
            metrics,
            tick_interval,
            is_leader: false,
            configured: Configured::Unconfigured,
        }
    }

    pub(super) async fn run(
        mut self,
        mut events: broadcast::Receiver<LeadershipEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed leadership events, reconciling");
                        self.reconcile().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("leadership stream closed, continuing on ticks");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }
        info!(configured = ?self.configured, "time-sync loop stopped");
    }

    async fn on_event(&mut self, event: LeadershipEvent) {
        match (event, self.is_leader) {
            (LeadershipEvent::Gained, false) => {
                self.is_leader = true;
                self.configured = Configured::Unconfigured;
                self.configure_leader().await;
            }
            (LeadershipEvent::Lost, true) => {
                // Follower ticks repoint the daemon at the new leader
                self.is_leader = false;
            }
            (event, _) => debug!(?event, "duplicate leadership event ignored"),
        }
    }

    async fn reconcile(&mut self) {
        let actual = self.consensus.state().is_leader();
        if actual != self.is_leader {
            self.on_event(LeadershipEvent::from(actual)).await;
        }
    }

    async fn on_tick(&mut self) {
        self.reconcile().await;

        if self.is_leader {
            if self.configured != Configured::Leader {
                self.configure_leader().await;
            }
        } else {
            self.follow().await;
        }
    }

    async fn configure_leader(&mut self) {
        let result = match self.timesync.render_leader() {
            Ok(()) => self.timesync.apply().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("serving time as leader");
                self.configured = Configured::Leader;
                self.metrics.timesync_applied(ROLE_LEADER);
            }
            Err(e) => {
                warn!(error = %e, "failed to configure time-sync as leader");
                self.metrics.timesync_error();
            }
        }
    }

    /// Point the daemon at the current leader, once per leader address
    async fn follow(&mut self) {
        let leader = self.consensus.leader_address();
        if leader.is_empty() {
            return;
        }

        let ip = match split_host(&leader) {
            Ok(ip) => ip,
            Err(e) => {
                warn!(%leader, error = %e, "ignoring unparseable leader address");
                return;
            }
        };
        if self.configured == Configured::Follower(ip) {
            return;
        }

        let leader_ip = ip.to_string();
        let result = match self.timesync.render_follower(&leader_ip) {
            Ok(()) => self.timesync.apply().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(leader = %leader_ip, "syncing time from leader");
                self.configured = Configured::Follower(ip);
                self.metrics.timesync_applied(ROLE_FOLLOWER);
            }
            Err(e) => {
                warn!(leader = %leader_ip, error = %e, "failed to configure time-sync as follower");
                self.metrics.timesync_error();
            }
        }
    }
}
