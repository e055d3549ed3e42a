//! Informer fan-in, filtering rules, startup ordering and backoff (§4.A).

use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::model::ParsedIngress;

/// Exponential backoff with jitter for failed list-watches (§4.A): initial
/// 1s, factor 1.5, jitter 10%, 10 steps.
pub fn backoff_schedule() -> Vec<Duration> {
    let mut schedule = Vec::with_capacity(10);
    let mut delay = 1.0_f64;
    for _ in 0..10 {
        schedule.push(Duration::from_secs_f64(delay));
        delay *= 1.5;
    }
    schedule
}

pub fn jittered(delay: Duration, jitter_fraction: f64, rand_unit: f64) -> Duration {
    let base = delay.as_secs_f64();
    let spread = base * jitter_fraction;
    let jittered = base - spread + 2.0 * spread * rand_unit;
    Duration::from_secs_f64(jittered.max(0.0))
}

/// Filtering rules applied before an ingress event is enqueued (§4.A).
pub fn should_enqueue_ingress(ingress: &ParsedIngress, cfg: &Config) -> bool {
    let class_ok = ingress
        .raw_annotations
        .get("kubernetes.io/ingress.class")
        .map(|c| c == &cfg.ingress_class)
        .unwrap_or(cfg.ingress_class == "tengine");
    if !class_ok {
        return false;
    }
    if let Some(ns) = &cfg.namespace {
        if &ingress.namespace != ns {
            return false;
        }
    }
    if cfg.disable_catch_all && ingress.rules.is_empty() && ingress.default_backend.is_some() {
        return false;
    }
    true
}

/// Secret events only enqueue when the secret is referenced by the reverse
/// index or is the configured default-TLS secret (§4.A).
pub fn should_enqueue_secret(secret_key: &str, is_referenced: bool, cfg: &Config) -> bool {
    is_referenced || cfg.default_ssl_certificate.as_deref() == Some(secret_key)
}

/// Endpoint update events are suppressed unless `subsets` changed (§4.A).
pub fn should_enqueue_endpoints_update(prev_subsets_hash: u64, new_subsets_hash: u64) -> bool {
    prev_subsets_hash != new_subsets_hash
}

/// ConfigMaps are enqueued when they're one of the three well-known maps,
/// or else trigger re-parse of any ingress annotating them (§4.A).
pub enum ConfigMapRelevance {
    WellKnown,
    ReferencedByIngresses(Vec<String>),
    Irrelevant,
}

pub fn configmap_relevance(
    cm_key: &str,
    main_config: Option<&str>,
    tcp_map: Option<&str>,
    udp_map: Option<&str>,
    referencing_ingresses: Vec<String>,
) -> ConfigMapRelevance {
    if Some(cm_key) == main_config || Some(cm_key) == tcp_map || Some(cm_key) == udp_map {
        ConfigMapRelevance::WellKnown
    } else if !referencing_ingresses.is_empty() {
        ConfigMapRelevance::ReferencedByIngresses(referencing_ingresses)
    } else {
        ConfigMapRelevance::Irrelevant
    }
}

/// Coordinates informer startup ordering (§4.A): non-ingress informers
/// sync first (bounded wait), then a short settle delay, then the ingress
/// informer starts. Checksum informers run in parallel and don't block
/// startup when their feature flag is off.
pub struct InformerSet {
    pub settle_delay: Duration,
    pub sync_timeout: Duration,
}

impl Default for InformerSet {
    fn default() -> Self {
        InformerSet {
            settle_delay: Duration::from_millis(500),
            sync_timeout: Duration::from_secs(30),
        }
    }
}

impl InformerSet {
    /// Runs `wait_for_non_ingress_sync`, then the settle delay, then starts
    /// the ingress informer via `start_ingress`. A sync timeout is reported
    /// but not fatal — the controller continues in degraded mode (§4.A).
    pub async fn startup<F, G, Fut, Gut>(&self, wait_for_non_ingress_sync: F, start_ingress: G)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = bool>,
        G: FnOnce() -> Gut,
        Gut: std::future::Future<Output = ()>,
    {
        let synced = tokio::time::timeout(self.sync_timeout, wait_for_non_ingress_sync())
            .await
            .unwrap_or(false);
        if !synced {
            warn!("non-ingress informer cache sync timed out; continuing in degraded mode");
        } else {
            info!("non-ingress informers synced");
        }
        tokio::time::sleep(self.settle_delay).await;
        start_ingress().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_by_factor_1_5_for_10_steps() {
        let schedule = backoff_schedule();
        assert_eq!(schedule.len(), 10);
        assert_eq!(schedule[0], Duration::from_secs_f64(1.0));
        assert!((schedule[1].as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let d = Duration::from_secs(10);
        let low = jittered(d, 0.1, 0.0);
        let high = jittered(d, 0.1, 1.0);
        assert!(low.as_secs_f64() >= 9.0 && low.as_secs_f64() <= 10.0);
        assert!(high.as_secs_f64() >= 10.0 && high.as_secs_f64() <= 11.0);
    }

    #[test]
    fn endpoints_update_suppressed_when_subsets_unchanged() {
        assert!(!should_enqueue_endpoints_update(1, 1));
        assert!(should_enqueue_endpoints_update(1, 2));
    }
}
