//! Dual-channel publisher (§4.G).
//!
//! Two decisions per sync, computed independently (§4.G intro) but run in
//! the sequence the state-machine diagram names: a full-reload decision
//! (structural fingerprint changed? render + reload + bounded dynamic
//! retries) and a hot-reload decision (payload MD5 changed? write the
//! shared-memory frame under the file-lock). `Publisher` owns the
//! last-published fingerprint and payload MD5; no other component reads or
//! writes them (§5).

pub mod proto;
pub mod shm;

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use prost::Message as _;
use tracing::{info, warn};

use crate::assemble::canary::split_weights;
use crate::config::Config;
use crate::error::PublishError;
use crate::metrics::MetricsSink;
use crate::model::{Location, RunningConfig, Server, TrafficShapingPolicy};

use self::proto::{
    router, tag_item, Config as ProtoConfig, HostRouter, PathRouter, TagItem, TagLocation,
    TagRouter, TagRule, VirtualService, WeightedUpstream,
};
use self::shm::ShmWriter;

/// Renders the full data-plane configuration file (`nginx.conf`-equivalent)
/// from a `RunningConfig`. The template language itself is an external
/// collaborator (§1); the core depends only on this trait boundary.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, running: &RunningConfig) -> Result<String, PublishError>;
}

/// Instructs the data plane to pick up a newly rendered configuration file
/// and, separately, to reconcile its dynamic (Lua/shared-dict) state. Both
/// are external HTTP/process contracts (§1); out of scope to implement
/// concretely, but required as a trait boundary for `Publisher` to be
/// unit-testable with a fake (§4.G.5).
#[async_trait]
pub trait DataPlaneControl: Send + Sync {
    async fn full_reload(&self, rendered: &str) -> Result<(), PublishError>;
    async fn dynamic_reconfigure(&self) -> Result<(), PublishError>;
}

/// Bounded retry schedule for dynamic reconfiguration after a full reload
/// (§4.G.5): 15 steps, 1s base, factor 0.8, 10% jitter.
pub fn dynamic_retry_schedule() -> Vec<Duration> {
    let mut schedule = Vec::with_capacity(15);
    let mut delay = 1.0_f64;
    for _ in 0..15 {
        schedule.push(Duration::from_secs_f64(delay));
        delay *= 0.8;
    }
    schedule
}

/// Outcome of one `Publisher::sync` call, surfaced to the reconcile worker
/// for logging and the caller's own state machine (§4.G state diagram).
#[derive(Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Fingerprint unchanged: nothing published.
    Idle,
    /// At least one channel was published.
    Published { full_reload: bool, shm_written: bool },
}

pub struct Publisher {
    writer: ShmWriter,
    last_fingerprint: RwLock<Option<String>>,
    last_payload_md5: RwLock<Option<String>>,
    default_canary_weight_total: u32,
    max_canary_weight_total: u32,
}

impl Publisher {
    pub fn new(cfg: &Config) -> Self {
        Publisher {
            writer: ShmWriter {
                lock_path: cfg.shm_service_cfg_file_lock.clone(),
                segment_path: format!("/dev/shm/{}", cfg.shm_segment_name()),
                segment_size: cfg.ingress_shm_size,
            },
            last_fingerprint: RwLock::new(None),
            last_payload_md5: RwLock::new(None),
            default_canary_weight_total: cfg.default_canary_weight_total,
            max_canary_weight_total: cfg.max_canary_weight_total,
        }
    }

    #[cfg(test)]
    fn with_writer(writer: ShmWriter) -> Self {
        Publisher {
            writer,
            last_fingerprint: RwLock::new(None),
            last_payload_md5: RwLock::new(None),
            default_canary_weight_total: 100,
            max_canary_weight_total: 1000,
        }
    }

    /// Run one sync's worth of publication decisions (§4.G).
    pub async fn sync(
        &self,
        running: &RunningConfig,
        template: &dyn TemplateRenderer,
        data_plane: &dyn DataPlaneControl,
        metrics: &dyn MetricsSink,
        now_ns: u64,
    ) -> Result<SyncOutcome, PublishError> {
        if self.last_fingerprint.read().as_deref() == Some(running.fingerprint.as_str()) {
            return Ok(SyncOutcome::Idle);
        }

        let rendered = template.render(running).await?;
        if let Err(e) = data_plane.full_reload(&rendered).await {
            metrics.reload_error();
            return Err(e);
        }

        let mut dynamic_ok = false;
        for (step, delay) in dynamic_retry_schedule().into_iter().enumerate() {
            match data_plane.dynamic_reconfigure().await {
                Ok(()) => {
                    dynamic_ok = true;
                    break;
                }
                Err(e) => {
                    warn!(step, error = %e, "dynamic reconfiguration attempt failed, retrying");
                    tokio::time::sleep(jittered(delay, 0.1)).await;
                }
            }
        }
        if !dynamic_ok {
            metrics.reload_error();
            warn!("dynamic reconfiguration exhausted retries; data plane keeps the reloaded file");
        } else {
            metrics.reload_success();
        }

        let proto_cfg = build_proto_config(
            running,
            self.default_canary_weight_total,
            self.max_canary_weight_total,
        );
        let payload = proto_cfg.encode_to_vec();
        let payload_md5 = shm::payload_md5_hex(&payload);

        let shm_written = if self.last_payload_md5.read().as_deref() == Some(payload_md5.as_str())
        {
            false
        } else {
            let frame = shm::build_frame(&payload, now_ns);
            self.writer.write_frame(&frame)?;
            *self.last_payload_md5.write() = Some(payload_md5);
            true
        };

        *self.last_fingerprint.write() = Some(running.fingerprint.clone());
        info!(full_reload = true, shm_written, "sync published");
        Ok(SyncOutcome::Published {
            full_reload: true,
            shm_written,
        })
    }
}

fn jittered(delay: Duration, jitter_fraction: f64) -> Duration {
    let base = delay.as_secs_f64();
    Duration::from_secs_f64((base * (1.0 - jitter_fraction)).max(0.0))
}

/// Translate a `RunningConfig` into the hot-reload protobuf `Config`
/// (§4.G.2). Canary priority ordering is fixed: header matches first,
/// cookie, query, modulus, then weight (§4.G).
pub fn build_proto_config(
    running: &RunningConfig,
    default_canary_weight_total: u32,
    max_canary_weight_total: u32,
) -> ProtoConfig {
    let mut routers = Vec::new();
    let mut services = Vec::new();

    for server in &running.servers {
        let default_backend = server
            .locations
            .iter()
            .find(|l| l.path == "/")
            .map(|l| l.backend.clone())
            .unwrap_or_default();

        let mut paths = Vec::new();
        for location in &server.locations {
            paths.push(PathRouter {
                prefix: location.path.clone(),
                service_name: location.backend.clone(),
                tags: location_tag_routers(location),
            });
            if let Some(vs) = virtual_service_for_location(
                location,
                default_canary_weight_total,
                max_canary_weight_total,
            ) {
                services.push(vs);
            }
        }

        routers.push(proto::Router {
            kind: Some(router::Kind::Host(HostRouter {
                host: server.hostname.clone(),
                service_name: default_backend,
                paths,
                tags: server
                    .locations
                    .iter()
                    .find(|l| l.path == "/")
                    .map(location_tag_routers)
                    .unwrap_or_default(),
                r#type: "http".into(),
            })),
        });
    }

    ProtoConfig { routers, services }
}

fn canary_priority(policy: &TrafficShapingPolicy) -> u8 {
    if policy.header.is_some() {
        0
    } else if policy.cookie.is_some() {
        1
    } else if policy.query.is_some() {
        2
    } else if policy.modulus.is_some() {
        3
    } else {
        4
    }
}

fn location_tag_routers(location: &Location) -> Vec<TagRouter> {
    let mut canaries = location.canaries.clone();
    canaries.sort_by_key(|c| canary_priority(&c.policy));

    canaries
        .iter()
        .filter_map(|canary| {
            let items = policy_to_tag_items(&canary.policy);
            if items.is_empty() {
                return None;
            }
            Some(TagRouter {
                service_name: canary.target.clone(),
                rules: vec![TagRule { items }],
            })
        })
        .collect()
}

fn policy_to_tag_items(policy: &TrafficShapingPolicy) -> Vec<TagItem> {
    let mut items = Vec::new();
    if let Some(header) = &policy.header {
        let condition = if policy.header_pattern {
            policy
                .header_value
                .clone()
                .map(|v| tag_item::Condition::StringList(vec![v]))
        } else {
            Some(tag_item::Condition::ExactString(
                policy.header_value.clone().unwrap_or_else(|| "always".into()),
            ))
        };
        items.push(TagItem {
            location: TagLocation::Header as i32,
            key: header.clone(),
            match_type: if policy.header_pattern {
                proto::MatchType::StrListIn as i32
            } else {
                proto::MatchType::Whole as i32
            },
            condition,
        });
    }
    if let Some(cookie) = &policy.cookie {
        items.push(TagItem {
            location: TagLocation::Cookie as i32,
            key: cookie.clone(),
            match_type: proto::MatchType::Whole as i32,
            condition: Some(tag_item::Condition::ExactString(
                policy.cookie_value.clone().unwrap_or_default(),
            )),
        });
    }
    if let Some(query) = &policy.query {
        items.push(TagItem {
            location: TagLocation::Query as i32,
            key: query.clone(),
            match_type: proto::MatchType::Whole as i32,
            condition: Some(tag_item::Condition::ExactString(
                policy.query_value.clone().unwrap_or_default(),
            )),
        });
    }
    if let Some(modulus) = &policy.modulus {
        items.push(TagItem {
            location: TagLocation::NgxVar as i32,
            key: "canary_mod".into(),
            match_type: proto::MatchType::ModCompare as i32,
            condition: Some(tag_item::Condition::ModCompare(proto::ModCompare {
                divisor: modulus.divisor,
                remainder: modulus.remainder,
                operator: proto::CompareOperator::Eq as i32,
            })),
        });
    }
    items
}

/// Build the weighted `VirtualService` for one location when it carries
/// canaries, applying the weight-clamp math from §4.G verbatim.
fn virtual_service_for_location(
    location: &Location,
    default_canary_weight_total: u32,
    max_canary_weight_total: u32,
) -> Option<VirtualService> {
    if location.canaries.is_empty() {
        return None;
    }
    let mut canaries = location.canaries.clone();
    canaries.sort_by_key(|c| canary_priority(&c.policy));

    let requested_total = canaries.iter().find_map(|c| c.policy.weight_total);
    let canary_weights: Vec<u32> = canaries.iter().map(|c| c.policy.weight.unwrap_or(0)).collect();
    let (primary_weight, _total) = split_weights(
        requested_total,
        &canary_weights,
        default_canary_weight_total,
        max_canary_weight_total,
    );

    let mut upstreams = Vec::new();
    if let Some(w) = primary_weight {
        upstreams.push(WeightedUpstream {
            target: location.backend.clone(),
            weight: w,
        });
    }
    for (canary, weight) in canaries.iter().zip(canary_weights) {
        upstreams.push(WeightedUpstream {
            target: canary.target.clone(),
            weight,
        });
    }

    Some(VirtualService {
        service_name: location.backend.clone(),
        upstreams,
        connect_timeout_ms: location.knobs.proxy.connect_timeout_s.unwrap_or(5) * 1000,
        read_timeout_ms: location.knobs.proxy.read_timeout_s.unwrap_or(60) * 1000,
        write_timeout_ms: location.knobs.proxy.send_timeout_s.unwrap_or(60) * 1000,
        force_https: false,
        metadata: Default::default(),
        actions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanaryRef, PathType};

    fn location_with_header_canary() -> Location {
        Location {
            path: "/".into(),
            path_type: PathType::Prefix,
            backend: "default-s-80".into(),
            canaries: vec![CanaryRef {
                target: "default-s2-80".into(),
                policy: TrafficShapingPolicy {
                    header: Some("X-Canary".into()),
                    header_value: None,
                    header_pattern: false,
                    cookie: None,
                    cookie_value: None,
                    query: None,
                    query_value: None,
                    modulus: None,
                    weight: Some(0),
                    weight_total: None,
                },
            }],
            is_default_backend_placeholder: false,
            knobs: Default::default(),
        }
    }

    #[test]
    fn header_canary_becomes_exact_string_always() {
        let tags = location_tag_routers(&location_with_header_canary());
        assert_eq!(tags.len(), 1);
        let item = &tags[0].rules[0].items[0];
        assert_eq!(item.location, TagLocation::Header as i32);
        match &item.condition {
            Some(tag_item::Condition::ExactString(s)) => assert_eq!(s, "always"),
            other => panic!("unexpected condition: {other:?}"),
        }
    }

    #[test]
    fn weight_split_virtual_service() {
        let mut loc = location_with_header_canary();
        loc.canaries[0].policy.header = None;
        loc.canaries[0].policy.weight = Some(30);
        loc.canaries[0].policy.weight_total = Some(100);
        let vs = virtual_service_for_location(&loc, 100, 1000).unwrap();
        let primary = vs.upstreams.iter().find(|u| u.target == "default-s-80").unwrap();
        let canary = vs.upstreams.iter().find(|u| u.target == "default-s2-80").unwrap();
        assert_eq!(primary.weight, 70);
        assert_eq!(canary.weight, 30);
    }

    #[tokio::test]
    async fn idle_when_fingerprint_unchanged() {
        use crate::metrics::NoopMetricsSink;

        struct NoopTemplate;
        #[async_trait]
        impl TemplateRenderer for NoopTemplate {
            async fn render(&self, _running: &RunningConfig) -> Result<String, PublishError> {
                Ok(String::new())
            }
        }
        struct NoopDataPlane;
        #[async_trait]
        impl DataPlaneControl for NoopDataPlane {
            async fn full_reload(&self, _rendered: &str) -> Result<(), PublishError> {
                Ok(())
            }
            async fn dynamic_reconfigure(&self) -> Result<(), PublishError> {
                Ok(())
            }
        }

        let dir = std::env::temp_dir().join(format!("publish-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let publisher = Publisher::with_writer(ShmWriter {
            lock_path: dir.join("lock").to_string_lossy().to_string(),
            segment_path: dir.join("segment").to_string_lossy().to_string(),
            segment_size: 4096,
        });

        let running = RunningConfig {
            servers: vec![],
            backends: vec![],
            tcp_services: vec![],
            udp_services: vec![],
            passthrough_backends: vec![],
            fingerprint: "abc".into(),
            controller_pod_count: 1,
        };

        let metrics = NoopMetricsSink;
        let first = publisher
            .sync(&running, &NoopTemplate, &NoopDataPlane, &metrics, 1)
            .await
            .unwrap();
        assert!(matches!(first, SyncOutcome::Published { .. }));

        let second = publisher
            .sync(&running, &NoopTemplate, &NoopDataPlane, &metrics, 2)
            .await
            .unwrap();
        assert_eq!(second, SyncOutcome::Idle);

        std::fs::remove_dir_all(&dir).ok();
    }
}
