//! VIP control loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::consensus::{Consensus, LeadershipEvent};
use crate::metrics::Metrics;
use crate::network::NetworkManager;

pub(super) struct VipLoop {
    consensus: Arc<dyn Consensus>,
    network: Arc<dyn NetworkManager>,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
    is_leader: bool,
    /// In-flight add+announce after gaining leadership
    claim: Option<JoinHandle<()>>,
    /// A release failed and is retried on follower ticks
    release_pending: bool,
    /// Last leader address seen while following
    leader_address: String,
}

impl VipLoop {
    pub(super) fn new(
        consensus: Arc<dyn Consensus>,
        network: Arc<dyn NetworkManager>,
        metrics: Arc<Metrics>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            consensus,
            network,
            metrics,
            tick_interval,
            is_leader: false,
            claim: None,
            release_pending: false,
            leader_address: String::new(),
        }
    }

    pub(super) async fn run(
        mut self,
        mut events: broadcast::Receiver<LeadershipEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        // A previous run may have died while holding the VIP
        if self.release().await {
            info!("removed VIP left over from a previous run");
        }

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

        self.wait_for_claim().await;
        if self.is_leader || self.release_pending {
            self.release().await;
        }
        info!("VIP loop stopped");
    }

    async fn on_event(&mut self, event: LeadershipEvent) {
        match (event, self.is_leader) {
            (LeadershipEvent::Gained, false) => {
                info!(term = self.consensus.term(), "gained leadership, claiming VIP");
                self.is_leader = true;
                self.metrics.leadership_changed(true);
                self.spawn_claim();
            }
            (LeadershipEvent::Lost, true) => {
                info!(term = self.consensus.term(), "lost leadership, releasing VIP");
                self.is_leader = false;
                self.metrics.leadership_changed(false);
                self.wait_for_claim().await;
                self.release().await;
            }
            (event, _) => debug!(?event, "duplicate leadership event ignored"),
        }
    }

    async fn reconcile(&mut self) {
        let actual = self.consensus.state().is_leader();
        if actual != self.is_leader {
            info!(is_leader = actual, "leadership changed without an event");
            self.on_event(LeadershipEvent::from(actual)).await;
        }
    }

    async fn on_tick(&mut self) {
        self.metrics.set_term(self.consensus.term());
        self.reconcile().await;

        if self.is_leader {
            self.verify().await;
        } else {
            self.observe_leader();
            if self.release_pending {
                self.release().await;
            }
        }
    }

    /// Restore the VIP if something removed it while we lead
    async fn verify(&mut self) {
        if self.claim.as_ref().is_some_and(|claim| !claim.is_finished()) {
            return;
        }
        self.claim = None;

        match self.network.is_present().await {
            Ok(true) => {}
            Ok(false) => match self.network.add().await {
                Ok(true) => {
                    warn!("VIP was missing, reclaimed");
                    self.metrics.vip_reclaimed();
                    announce(self.network.as_ref(), &self.metrics).await;
                }
                Ok(false) => {}
                Err(_) => self.metrics.vip_error("add"),
            },
            Err(_) => self.metrics.vip_error("check"),
        }
    }

    fn observe_leader(&mut self) {
        let leader = self.consensus.leader_address();
        if leader != self.leader_address {
            if leader.is_empty() {
                info!("leader unknown");
            } else {
                info!(%leader, "following leader");
            }
            self.leader_address = leader;
        }
    }

    fn spawn_claim(&mut self) {
        let network = self.network.clone();
        let metrics = self.metrics.clone();
        self.claim = Some(tokio::spawn(
            async move {
                match network.add().await {
                    Ok(added) => {
                        if added {
                            metrics.vip_claimed();
                        }
                        announce(network.as_ref(), &metrics).await;
                    }
                    Err(_) => metrics.vip_error("add"),
                }
            }
            .in_current_span(),
        ));
    }

    async fn wait_for_claim(&mut self) {
        if let Some(claim) = self.claim.take() {
            if let Err(e) = claim.await {
                warn!(error = %e, "VIP claim task failed");
            }
        }
    }

    /// Remove the VIP if present. Returns whether it was removed.
    async fn release(&mut self) -> bool {
        match self.network.remove().await {
            Ok(removed) => {
                self.release_pending = false;
                if removed {
                    self.metrics.vip_released();
                }
                removed
            }
            Err(_) => {
                self.release_pending = true;
                self.metrics.vip_error("remove");
                false
            }
        }
    }
}

async fn announce(network: &dyn NetworkManager, metrics: &Metrics) {
    if network.announce().await.is_err() {
        metrics.vip_error("announce");
    }
}
