//! Prometheus metrics for floatd
//!
//! Failover activity is only otherwise visible in logs. These counters make
//! leadership flaps and failing side effects alertable.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

/// Role label for time-sync applies
pub const ROLE_LEADER: &str = "leader";
pub const ROLE_FOLLOWER: &str = "follower";

/// All floatd metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Leadership
    pub is_leader: IntGauge,
    pub raft_term: IntGauge,
    pub leadership_changes_total: IntCounter,

    // VIP
    pub vip_claims_total: IntCounter,
    pub vip_reclaims_total: IntCounter,
    pub vip_releases_total: IntCounter,
    pub vip_errors_total: IntCounterVec,

    // Time sync
    pub timesync_applies_total: IntCounterVec,
    pub timesync_errors_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let is_leader = IntGauge::with_opts(Opts::new(
            "floatd_is_leader",
            "1 while this node holds leadership, 0 otherwise",
        ))?;
        let raft_term = IntGauge::with_opts(Opts::new(
            "floatd_raft_term",
            "Current consensus term",
        ))?;
        let leadership_changes_total = IntCounter::with_opts(Opts::new(
            "floatd_leadership_changes_total",
            "Leadership transitions observed by the VIP loop",
        ))?;

        let vip_claims_total = IntCounter::with_opts(Opts::new(
            "floatd_vip_claims_total",
            "VIP additions after gaining leadership",
        ))?;
        let vip_reclaims_total = IntCounter::with_opts(Opts::new(
            "floatd_vip_reclaims_total",
            "VIP additions after the address went missing while leader",
        ))?;
        let vip_releases_total = IntCounter::with_opts(Opts::new(
            "floatd_vip_releases_total",
            "VIP removals",
        ))?;
        let vip_errors_total = IntCounterVec::new(
            Opts::new("floatd_vip_errors_total", "Failed VIP operations"),
            &["op"],
        )?;

        let timesync_applies_total = IntCounterVec::new(
            Opts::new(
                "floatd_timesync_applies_total",
                "Time-sync configurations written and activated",
            ),
            &["role"],
        )?;
        let timesync_errors_total = IntCounter::with_opts(Opts::new(
            "floatd_timesync_errors_total",
            "Failed time-sync renders or applies",
        ))?;

        registry.register(Box::new(is_leader.clone()))?;
        registry.register(Box::new(raft_term.clone()))?;
        registry.register(Box::new(leadership_changes_total.clone()))?;
        registry.register(Box::new(vip_claims_total.clone()))?;
        registry.register(Box::new(vip_reclaims_total.clone()))?;
        registry.register(Box::new(vip_releases_total.clone()))?;
        registry.register(Box::new(vip_errors_total.clone()))?;
        registry.register(Box::new(timesync_applies_total.clone()))?;
        registry.register(Box::new(timesync_errors_total.clone()))?;

        Ok(Metrics {
            registry,
            is_leader,
            raft_term,
            leadership_changes_total,
            vip_claims_total,
            vip_reclaims_total,
            vip_releases_total,
            vip_errors_total,
            timesync_applies_total,
            timesync_errors_total,
        })
    }

    pub fn leadership_changed(&self, is_leader: bool) {
        self.is_leader.set(i64::from(is_leader));
        self.leadership_changes_total.inc();
    }

    pub fn set_term(&self, term: u64) {
        self.raft_term.set(i64::try_from(term).unwrap_or(i64::MAX));
    }

    pub fn vip_claimed(&self) {
        self.vip_claims_total.inc();
    }

    pub fn vip_reclaimed(&self) {
        self.vip_reclaims_total.inc();
    }

    pub fn vip_released(&self) {
        self.vip_releases_total.inc();
    }

    pub fn vip_error(&self, op: &str) {
        self.vip_errors_total.with_label_values(&[op]).inc();
    }

    pub fn timesync_applied(&self, role: &str) {
        self.timesync_applies_total.with_label_values(&[role]).inc();
    }

    pub fn timesync_error(&self) {
        self.timesync_errors_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_leadership_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.leadership_changed(true);
        assert_eq!(metrics.is_leader.get(), 1);
        metrics.leadership_changed(false);
        assert_eq!(metrics.is_leader.get(), 0);
        assert_eq!(metrics.leadership_changes_total.get(), 2);
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.vip_error("add");
        metrics.vip_error("add");
        metrics.vip_error("announce");
        metrics.timesync_applied(ROLE_FOLLOWER);

        assert_eq!(metrics.vip_errors_total.with_label_values(&["add"]).get(), 2);
        assert_eq!(
            metrics
                .timesync_applies_total
                .with_label_values(&[ROLE_FOLLOWER])
                .get(),
            1
        );
    }

    #[test]
    fn test_registry_gathers_all() {
        let metrics = Metrics::new().unwrap();
        metrics.vip_error("remove");
        metrics.timesync_applied(ROLE_LEADER);
        metrics.set_term(3);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("floatd_is_leader 0"));
        assert!(text.contains("floatd_vip_errors_total{op=\"remove\"} 1"));
        assert!(text.contains("floatd_timesync_applies_total{role=\"leader\"} 1"));
        assert_eq!(metrics.raft_term.get(), 3);
    }
}
