//! Canary merge (§4.E, §8).
//!
//! After the primary pass, set-aside canary ingresses are merged: for each
//! canary's host/path, locate the matching primary server+location and
//! append the canary backend to `canaries[]`, also inserting the backend
//! name into the primary upstream's `AlternativeBackends`. Merge actions
//! are idempotent.

use tracing::warn;

use crate::model::{Backend, CanaryRef, Location, Server};

pub struct CanaryCandidate {
    pub host: String,
    pub path: String,
    pub backend_name: String,
    pub policy: crate::model::TrafficShapingPolicy,
    pub is_canary_itself: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    SuppressedPrimaryIsCanary,
    SuppressedSameUpstream,
    SuppressedPrimaryMissing,
    SuppressedCapReached,
}

/// Apply one canary merge, enforcing all four guards from §4.E:
/// - may not merge if the primary is itself canary
/// - may not merge if the two resolve to the same upstream name
/// - may not merge if the primary upstream no longer exists
/// - may not merge if `max_canary_ing_num` is reached for the location
pub fn merge_canary(
    servers: &mut [Server],
    backends: &mut [Backend],
    candidate: &CanaryCandidate,
    max_canary_ing_num: usize,
) -> MergeOutcome {
    if candidate.is_canary_itself {
        return MergeOutcome::SuppressedPrimaryIsCanary;
    }

    let Some(server) = servers.iter_mut().find(|s| s.hostname == candidate.host) else {
        return MergeOutcome::SuppressedPrimaryMissing;
    };
    let Some(location) = server.locations.iter_mut().find(|l| l.path == candidate.path) else {
        return MergeOutcome::SuppressedPrimaryMissing;
    };

    if location.backend == candidate.backend_name {
        return MergeOutcome::SuppressedSameUpstream;
    }
    if !backends.iter().any(|b| b.name == location.backend) {
        return MergeOutcome::SuppressedPrimaryMissing;
    }
    if location.canaries.iter().any(|c| c.target == candidate.backend_name) {
        // Idempotent: already merged.
        return MergeOutcome::Merged;
    }
    if location.canaries.len() >= max_canary_ing_num {
        warn!(host = %candidate.host, path = %candidate.path, "canary cap reached, suppressing merge");
        return MergeOutcome::SuppressedCapReached;
    }

    location.canaries.push(CanaryRef {
        target: candidate.backend_name.clone(),
        policy: candidate.policy.clone(),
    });

    if let Some(primary) = backends.iter_mut().find(|b| b.name == location.backend) {
        if !primary.alternative_backends.contains(&candidate.backend_name) {
            primary.alternative_backends.push(candidate.backend_name.clone());
        }
    }

    MergeOutcome::Merged
}

/// Weight-split math (§4.G): total clamped to
/// `[default_canary_weight_total, max_canary_weight_total]`, primary weight
/// = total - sum(canary weights), never negative (else primary is skipped).
pub fn split_weights(
    requested_total: Option<u32>,
    canary_weights: &[u32],
    default_total: u32,
    max_total: u32,
) -> (Option<u32>, u32) {
    let total = requested_total
        .map(|t| t.clamp(default_total, max_total))
        .unwrap_or(default_total);
    let canary_sum: u32 = canary_weights.iter().sum();
    if canary_sum > total {
        (None, total)
    } else {
        (Some(total - canary_sum), total)
    }
}

pub fn location_by_path<'a>(locations: &'a [Location], path: &str) -> Option<&'a Location> {
    locations.iter().find(|l| l.path == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocationKnobs, PathType, TrafficShapingPolicy};

    fn make_server(backend: &str) -> Server {
        Server {
            hostname: "foo.bar".into(),
            aliases: vec![],
            locations: vec![Location {
                path: "/".into(),
                path_type: PathType::Prefix,
                backend: backend.into(),
                canaries: vec![],
                is_default_backend_placeholder: false,
                knobs: LocationKnobs::default(),
            }],
            ssl_certs: vec![],
            ssl_ciphers: None,
            ssl_protocols: None,
            ssl_passthrough: false,
            need_default_cert: false,
            session_affinity: None,
            cors: None,
            server_snippet: None,
            client_auth_tls: None,
        }
    }

    fn backend(name: &str) -> Backend {
        Backend {
            name: name.into(),
            port: 80,
            endpoints: vec![],
            session_affinity: None,
            hash_by: None,
            load_balancing: Default::default(),
            alternative_backends: vec![],
            no_server: false,
            traffic_shaping_policy: None,
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let mut servers = vec![make_server("default-s-80")];
        let mut backends = vec![backend("default-s-80"), backend("default-s2-80")];
        let candidate = CanaryCandidate {
            host: "foo.bar".into(),
            path: "/".into(),
            backend_name: "default-s2-80".into(),
            policy: TrafficShapingPolicy::default(),
            is_canary_itself: false,
        };
        let first = merge_canary(&mut servers, &mut backends, &candidate, 20);
        let second = merge_canary(&mut servers, &mut backends, &candidate, 20);
        assert_eq!(first, MergeOutcome::Merged);
        assert_eq!(second, MergeOutcome::Merged);
        assert_eq!(servers[0].locations[0].canaries.len(), 1);
        assert_eq!(backends[0].alternative_backends, vec!["default-s2-80".to_string()]);
    }

    #[test]
    fn suppresses_when_same_upstream() {
        let mut servers = vec![make_server("default-s-80")];
        let mut backends = vec![backend("default-s-80")];
        let candidate = CanaryCandidate {
            host: "foo.bar".into(),
            path: "/".into(),
            backend_name: "default-s-80".into(),
            policy: TrafficShapingPolicy::default(),
            is_canary_itself: false,
        };
        assert_eq!(
            merge_canary(&mut servers, &mut backends, &candidate, 20),
            MergeOutcome::SuppressedSameUpstream
        );
    }

    #[test]
    fn weight_split_never_goes_negative() {
        let (primary, total) = split_weights(Some(30), &[70], 100, 1000);
        assert_eq!(total, 100);
        assert_eq!(primary, Some(30));

        let (primary_overflow, _) = split_weights(Some(100), &[150], 100, 1000);
        assert_eq!(primary_overflow, None);
    }

    #[test]
    fn weight_total_clamps_to_default_range() {
        let (_, total) = split_weights(Some(5), &[1], 100, 1000);
        assert_eq!(total, 100);
        let (_, total_high) = split_weights(Some(5000), &[1], 100, 1000);
        assert_eq!(total_high, 1000);
    }
}
