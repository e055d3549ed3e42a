//! Single reconcile worker (§5).
//!
//! Owns the whole `gate(checksum) -> assemble -> publish` pipeline. Every
//! batch drained off the ring buffer triggers exactly one pass: the
//! assembler always reads a fresh snapshot of every store, never the
//! triggering event's payload, so coalesced events never cause missed
//! updates. Rate-limited to `cfg.sync_rate_limit` passes per second.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{info, warn};

use crate::annotations::Registry;
use crate::assemble::{assemble, AssembleInput};
use crate::checksum::{self, GateResult};
use crate::config::Config;
use crate::metrics::MetricsSink;
use crate::model::{CheckSumSpec, RollingState, RunningConfig};
use crate::publish::{DataPlaneControl, Publisher, TemplateRenderer};
use crate::rolling::{pod_ordinal, rolling_state};
use crate::watch::events::RingBuffer;
use crate::watch::store::StoreSet;

/// Ties the watch-layer snapshot, the checksum admission gate, the
/// assembler and the publisher together (§5). One instance per process;
/// it is the sole writer of `RunningConfig` history.
pub struct ReconcileWorker {
    stores: Arc<StoreSet>,
    cfg: Arc<Config>,
    registry: Arc<Registry>,
    publisher: Publisher,
    metrics: Arc<dyn MetricsSink>,
    limiter: DefaultDirectRateLimiter,
    pod_ordinal: i32,
    template: Arc<dyn TemplateRenderer>,
    data_plane: Arc<dyn DataPlaneControl>,
}

impl ReconcileWorker {
    pub fn new(
        stores: Arc<StoreSet>,
        cfg: Arc<Config>,
        registry: Arc<Registry>,
        metrics: Arc<dyn MetricsSink>,
        template: Arc<dyn TemplateRenderer>,
        data_plane: Arc<dyn DataPlaneControl>,
        own_pod_name: &str,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(cfg.sync_rate_limit.max(1)).unwrap());
        ReconcileWorker {
            publisher: Publisher::new(&cfg),
            stores,
            registry,
            metrics,
            limiter: RateLimiter::direct(quota),
            pod_ordinal: pod_ordinal(own_pod_name),
            template,
            data_plane,
            cfg,
        }
    }

    /// Drains the ring buffer and runs one sync per (coalesced) batch until
    /// `shutdown` fires. A shutdown observed between assembly and publish
    /// is honored; one already in flight inside `assemble` is not
    /// interrupted (§5).
    pub async fn run(&self, ring: &RingBuffer, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let batch = tokio::select! {
                batch = ring.recv_batch() => batch,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconcile worker shutting down");
                        return;
                    }
                    continue;
                }
            };
            let Some(batch) = batch else {
                info!("ring buffer closed, reconcile worker exiting");
                return;
            };
            self.limiter.until_ready().await;
            info!(events = batch.len(), "running sync");

            if *shutdown.borrow() {
                info!("shutdown observed before publish, dropping this sync");
                return;
            }

            if let Err(e) = self.sync_once().await {
                warn!(error = %e, "sync failed");
            }
        }
    }

    async fn sync_once(&self) -> Result<(), crate::error::CoreError> {
        let ingresses = self.stores.ingress_snapshot();
        let secrets = self.stores.secrets.list();

        if self.cfg.use_ingress_checksum {
            let declared = self.stores.ingress_checksums.list();
            if !self.evaluate_ingress_gate(&ingresses, &declared) {
                return Ok(());
            }
        }
        if self.cfg.use_secret_checksum {
            let declared = self.stores.secret_checksums.list();
            if !self.evaluate_secret_gate(&secrets, &declared) {
                return Ok(());
            }
        }

        let active_ingresses: Vec<_> = ingresses
            .into_iter()
            .filter(|ing| rolling_state(self.pod_ordinal, &ing.bundle.rollout) != RollingState::InactiveRollout)
            .collect();

        let ssl_certs: Vec<_> = secrets
            .iter()
            .filter(|s| rolling_state(self.pod_ordinal, &s.bundle.rollout) != RollingState::InactiveRollout)
            .filter_map(|s| s.ssl_cert.clone())
            .collect();

        let services: std::collections::BTreeMap<String, _> = self
            .stores
            .services
            .list()
            .into_iter()
            .map(|s| (format!("{}/{}", s.namespace, s.name), s))
            .collect();
        let endpoints: std::collections::BTreeMap<String, _> = self
            .stores
            .endpoints
            .list()
            .into_iter()
            .map(|e| (format!("{}/{}", e.namespace, e.name), e))
            .collect();

        let tcp_configmap = self.named_configmap(self.cfg.tcp_configmap.as_deref());
        let udp_configmap = self.named_configmap(self.cfg.udp_configmap.as_deref());

        let input = AssembleInput {
            ingresses: &active_ingresses,
            services: &services,
            endpoints: &endpoints,
            ssl_certs: &ssl_certs,
            tcp_configmap: tcp_configmap.as_ref(),
            udp_configmap: udp_configmap.as_ref(),
            controller_pod_count: self.stores.pods.list().len(),
        };

        let running: RunningConfig = assemble(&input, &self.cfg, &self.registry, self.metrics.as_ref());
        self.metrics
            .set_active_hosts(&crate::assemble::active_hosts(&running.servers));

        let now_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .max(0) as u64;
        self.publisher
            .sync(
                &running,
                self.template.as_ref(),
                self.data_plane.as_ref(),
                self.metrics.as_ref(),
                now_ns,
            )
            .await?;
        Ok(())
    }

    fn named_configmap(&self, key: Option<&str>) -> Option<std::collections::HashMap<String, String>> {
        let key = key?;
        let cm = self.stores.config_maps.get(key)?;
        Some(crate::watch::convert::configmap_to_hashmap(&cm))
    }

    fn evaluate_ingress_gate(
        &self,
        ingresses: &[crate::model::ParsedIngress],
        declared: &[CheckSumSpec],
    ) -> bool {
        let ids: Vec<String> = ingresses
            .iter()
            .filter_map(|ing| {
                let version = crate::watch::convert::ingress_version_annotation(&ing.raw_annotations);
                checksum::ingress_id(&ing.name, version.as_deref())
            })
            .collect();
        self.evaluate_gate(&ids, declared, true)
    }

    fn evaluate_secret_gate(
        &self,
        secrets: &[crate::model::ParsedSecret],
        declared: &[CheckSumSpec],
    ) -> bool {
        let ids: Vec<String> = secrets
            .iter()
            .filter_map(|s| {
                let version = s.bundle.checksum.version.as_deref();
                let pem_sha = s.ssl_cert.as_ref().map(|c| c.sha_fingerprint.as_str());
                checksum::secret_id(&s.name, version, pem_sha)
            })
            .collect();
        self.evaluate_gate(&ids, declared, false)
    }

    /// §4.F: a mismatch alarms only once a sentinel file exists -- its
    /// presence marks "this controller has applied at least once", which
    /// distinguishes a freshly-started controller (silent-rejected, no
    /// alarm) from one that regresses after a successful publish (alarm).
    /// The sentinel is `status_tengine_file_path` itself: `SignalFileDataPlane`
    /// creates it on every successful `full_reload`, so its existence is
    /// exactly "at least one successful publish has occurred".
    fn evaluate_gate(&self, ids: &[String], declared: &[CheckSumSpec], is_ingress: bool) -> bool {
        let result: GateResult = checksum::evaluate(ids, declared);
        if result.accepted {
            if is_ingress {
                self.metrics.ingress_check_success();
            } else {
                self.metrics.secret_check_success();
            }
            true
        } else {
            let err = checksum::mismatch_error(&result);
            let sentinel_exists = std::path::Path::new(&self.cfg.status_tengine_file_path).exists();
            if sentinel_exists {
                warn!(error = %err, is_ingress, "checksum admission gate rejected sync (alarm: controller was previously applied)");
                if is_ingress {
                    self.metrics.ingress_check_error();
                } else {
                    self.metrics.secret_check_error();
                }
            } else {
                info!(error = %err, is_ingress, "checksum admission gate rejected sync (silent: no prior successful publish)");
            }
            false
        }
    }
}
