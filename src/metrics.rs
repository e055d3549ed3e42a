//! Metrics sink contract (§4.H). Concrete Prometheus wiring is an external
//! collaborator; the core only depends on this trait.

use std::collections::HashSet;

pub trait MetricsSink: Send + Sync {
    fn reload_success(&self);
    fn reload_error(&self);
    fn ingress_check_success(&self);
    fn ingress_check_error(&self);
    fn secret_check_success(&self);
    fn secret_check_error(&self);
    fn ssl_cert_verify_fail(&self, host: &str);
    fn invalid_ingress_referrer(&self);
    fn invalid_canary_referrer(&self);
    fn canary_count_limit_exceeded(&self);
    fn leader_election(&self, is_leader: bool);
    fn ssl_expiration_seconds(&self, host: &str, seconds: i64);

    /// Called after each successful sync so removed hosts can be evicted
    /// from per-host gauges.
    fn set_active_hosts(&self, hosts: &HashSet<String>);
}

/// Default no-op sink, used in tests and wherever metrics are not wired.
#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn reload_success(&self) {}
    fn reload_error(&self) {}
    fn ingress_check_success(&self) {}
    fn ingress_check_error(&self) {}
    fn secret_check_success(&self) {}
    fn secret_check_error(&self) {}
    fn ssl_cert_verify_fail(&self, _host: &str) {}
    fn invalid_ingress_referrer(&self) {}
    fn invalid_canary_referrer(&self) {}
    fn canary_count_limit_exceeded(&self) {}
    fn leader_election(&self, _is_leader: bool) {}
    fn ssl_expiration_seconds(&self, _host: &str, _seconds: i64) {}
    fn set_active_hosts(&self, _hosts: &HashSet<String>) {}
}
