//! Configuration assembler (§4.E).
//!
//! Central operation: `assemble(ingresses[]) -> (hostSet, serverList,
//! runningConfig)`. Walks every (non-canary) ingress to build upstreams and
//! servers/locations, then merges set-aside canary ingresses in a second
//! pass, then sorts everything into the deterministic ordering the
//! fingerprint depends on.

pub mod canary;
pub mod location;
pub mod server;
pub mod stream;
pub mod upstream;

use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::annotations::Registry;
use crate::config::Config;
use crate::metrics::MetricsSink;
use crate::model::{
    Backend, IngressPath, Location, LocationKnobs, ParsedIngress, PathType, RunningConfig,
    Server, SslCert, StreamProtocol,
};
use crate::watch::store::{EndpointsRecord, ServiceRecord, StoreSet};

use self::canary::{CanaryCandidate, MergeOutcome};
use self::upstream::{backend_name, build_backend, resolve_port, BackendSpec};

/// Everything the assembler reads from the watch layer's snapshot (§5:
/// "the assembler always reads the full snapshot of all stores at the
/// start of each sync").
pub struct AssembleInput<'a> {
    pub ingresses: &'a [ParsedIngress],
    pub services: &'a BTreeMap<String, ServiceRecord>,
    pub endpoints: &'a BTreeMap<String, EndpointsRecord>,
    pub ssl_certs: &'a [SslCert],
    pub tcp_configmap: Option<&'a std::collections::HashMap<String, String>>,
    pub udp_configmap: Option<&'a std::collections::HashMap<String, String>>,
    pub controller_pod_count: usize,
}

pub fn assemble(
    input: &AssembleInput,
    cfg: &Config,
    registry: &Registry,
    metrics: &dyn MetricsSink,
) -> RunningConfig {
    let mut servers: Vec<Server> = Vec::new();
    let default_backend = cfg.default_service.replace('/', "-");
    servers.push(Server::new_catch_all(&default_backend));

    let mut backends: Vec<Backend> = Vec::new();
    let mut canary_candidates: Vec<(CanaryCandidate, bool)> = Vec::new();

    for ingress in input.ingresses {
        let (bundle, diagnostics, hard_reject) = registry.parse_ingress(
            &ingress.raw_annotations,
            &cfg.ingress_referrer,
            &cfg.canary_referrer,
        );
        for d in &diagnostics {
            warn!(ingress = %ingress.key(), error = %d, "non-fatal annotation issue");
        }
        if let Some(err) = hard_reject {
            warn!(ingress = %ingress.key(), error = %err, "ingress rejected by annotation registry");
            if matches!(err, crate::error::AnnotationError::LocationDenied(ref r) if r.contains("canary"))
            {
                metrics.invalid_canary_referrer();
            } else if matches!(err, crate::error::AnnotationError::LocationDenied(ref r) if r.contains("referrer"))
            {
                metrics.invalid_ingress_referrer();
            }
            continue;
        }

        if bundle.canary.enabled {
            queue_canary_candidates(ingress, &bundle, &mut canary_candidates, input, cfg);
            continue;
        }

        for rule in &ingress.rules {
            let host = rule.host.clone();
            let srv = server::find_or_create_server(&mut servers, &host, &default_backend);
            server::merge_server_knobs(
                srv,
                &host,
                bundle.session_affinity.as_deref(),
                &bundle.aliases,
                bundle.server_snippet.as_deref(),
                bundle.ssl_ciphers.as_deref(),
                bundle.cors.as_ref(),
            );
            srv.ssl_passthrough = srv.ssl_passthrough || bundle.ssl_passthrough;

            if !host.is_empty() && srv.ssl_certs.is_empty() {
                let explicit: Vec<&SslCert> = ingress
                    .tls
                    .iter()
                    .filter(|t| t.hosts.iter().any(|h| h == &host))
                    .filter_map(|t| {
                        input
                            .ssl_certs
                            .iter()
                            .find(|c| c.secret_key.ends_with(&t.secret_name))
                    })
                    .collect();
                let explicit_declared = !ingress.tls.is_empty() && ingress.tls.iter().any(|t| t.hosts.iter().any(|h| h == &host));
                let bound = server::bind_tls(srv, &host, explicit.into_iter(), input.ssl_certs.iter());
                if explicit_declared && !bound {
                    metrics.ssl_cert_verify_fail(&host);
                }
            }

            for path in &rule.paths {
                let backend_ref = &path.backend;
                let Some(service) = input.services.get(&format!(
                    "{}/{}",
                    ingress.namespace, backend_ref.service_name
                )) else {
                    warn!(service = %backend_ref.service_name, "referenced service not found");
                    continue;
                };
                let Some(port) = resolve_port(service, &backend_ref.service_port) else {
                    warn!(service = %backend_ref.service_name, "could not resolve service port");
                    continue;
                };
                let name = backend_name(&ingress.namespace, &service.name, port);
                if !backends.iter().any(|b| b.name == name) {
                    let endpoints = input
                        .endpoints
                        .get(&format!("{}/{}", ingress.namespace, service.name));
                    backends.push(build_backend(
                        &ingress.namespace,
                        service,
                        endpoints,
                        port,
                        BackendSpec {
                            backend_ref,
                            session_affinity: bundle.session_affinity.clone(),
                            hash_by: bundle.hash_by.clone(),
                            load_balancing: bundle.load_balancing.clone(),
                            service_upstream: bundle.service_upstream,
                            no_server: false,
                            traffic_shaping_policy: None,
                        },
                    ));
                }

                let new_loc = Location {
                    path: path.path.clone(),
                    path_type: path.path_type,
                    backend: name,
                    canaries: vec![],
                    is_default_backend_placeholder: false,
                    knobs: location_knobs_from_bundle(&bundle),
                };
                location::upsert_location(&mut srv.locations, new_loc, &host);
            }
            location::sort_locations(&mut srv.locations);
        }
    }

    // Second pass: merge canary candidates (§4.E, §8).
    for (candidate, is_canary_itself) in &canary_candidates {
        let candidate = CanaryCandidate {
            host: candidate.host.clone(),
            path: candidate.path.clone(),
            backend_name: candidate.backend_name.clone(),
            policy: candidate.policy.clone(),
            is_canary_itself: *is_canary_itself,
        };
        let outcome = canary::merge_canary(&mut servers, &mut backends, &candidate, cfg.max_canary_ing_num);
        if matches!(outcome, MergeOutcome::SuppressedCapReached) {
            metrics.canary_count_limit_exceeded();
        }
    }

    sort_running_config(&mut servers, &mut backends);

    let tcp_services = input
        .tcp_configmap
        .map(|d| stream::materialize(d, StreamProtocol::Tcp, &cfg.reserved_stream_ports()))
        .unwrap_or_default();
    let udp_services = input
        .udp_configmap
        .map(|d| stream::materialize(d, StreamProtocol::Udp, &cfg.reserved_stream_ports()))
        .unwrap_or_default();

    let passthrough_backends: Vec<String> = servers
        .iter()
        .filter(|s| s.ssl_passthrough)
        .flat_map(|s| s.locations.iter().map(|l| l.backend.clone()))
        .collect();

    let fingerprint = fingerprint_of(&servers, &backends, &tcp_services, &udp_services);

    RunningConfig {
        servers,
        backends,
        tcp_services,
        udp_services,
        passthrough_backends,
        fingerprint,
        controller_pod_count: input.controller_pod_count,
    }
}

fn queue_canary_candidates(
    ingress: &ParsedIngress,
    bundle: &crate::annotations::types::AnnotationBundle,
    out: &mut Vec<(CanaryCandidate, bool)>,
    input: &AssembleInput,
    _cfg: &Config,
) {
    for rule in &ingress.rules {
        for path in &rule.paths {
            let Some(service) = input.services.get(&format!(
                "{}/{}",
                ingress.namespace, path.backend.service_name
            )) else {
                continue;
            };
            let Some(port) = resolve_port(service, &path.backend.service_port) else {
                continue;
            };
            let name = backend_name(&ingress.namespace, &service.name, port);
            out.push((
                CanaryCandidate {
                    host: if rule.host.is_empty() { "_".into() } else { rule.host.clone() },
                    path: path.path.clone(),
                    backend_name: name,
                    policy: bundle.canary.policy.clone(),
                    is_canary_itself: false,
                },
                false,
            ));
        }
    }
}

fn location_knobs_from_bundle(bundle: &crate::annotations::types::AnnotationBundle) -> LocationKnobs {
    LocationKnobs {
        cors: bundle.cors.clone(),
        rewrite_target: bundle.rewrite_target.clone(),
        redirect: bundle.redirect.clone(),
        rate_limit: bundle.rate_limit.clone(),
        proxy: bundle.proxy.clone(),
        whitelist: bundle.whitelist.clone(),
        auth: bundle.auth.clone(),
        custom_errors: bundle.custom_errors.clone(),
        robots_disabled: bundle.robots_disabled,
        client_auth_tls: bundle.client_auth_tls.clone(),
    }
}

/// Deterministic ordering (§4.E, §8): servers by hostname ascending;
/// locations within a server by the rule in `location::location_order`;
/// SSL certs within a server by name; upstreams by name ascending.
fn sort_running_config(servers: &mut [Server], backends: &mut [Backend]) {
    servers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    for server in servers.iter_mut() {
        location::sort_locations(&mut server.locations);
        server.ssl_certs.sort_by(|a, b| a.secret_key.cmp(&b.secret_key));
    }
    backends.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Content hash of the normalized structure (§3, §8): computed only after
/// sorting so non-semantic ordering changes never move the fingerprint.
pub fn fingerprint_of(
    servers: &[Server],
    backends: &[Backend],
    tcp_services: &[crate::model::StreamService],
    udp_services: &[crate::model::StreamService],
) -> String {
    let mut hasher = Sha256::new();
    for s in servers {
        hasher.update(s.hostname.as_bytes());
        for l in &s.locations {
            hasher.update(l.path.as_bytes());
            hasher.update(l.backend.as_bytes());
            for c in &l.canaries {
                hasher.update(c.target.as_bytes());
            }
        }
        for c in &s.ssl_certs {
            hasher.update(c.sha_fingerprint.as_bytes());
        }
    }
    for b in backends {
        hasher.update(b.name.as_bytes());
        hasher.update(b.port.to_be_bytes());
        for e in &b.endpoints {
            hasher.update(e.address.as_bytes());
            hasher.update(e.port.to_be_bytes());
        }
        for a in &b.alternative_backends {
            hasher.update(a.as_bytes());
        }
    }
    for s in tcp_services.iter().chain(udp_services) {
        hasher.update(s.listen_port.to_be_bytes());
        hasher.update(s.namespace.as_bytes());
        hasher.update(s.service.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn active_hosts(servers: &[Server]) -> HashSet<String> {
    servers.iter().map(|s| s.hostname.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::store::ServicePortRecord;
    use clap::Parser;
    use std::collections::BTreeMap as Map;

    fn cfg() -> Config {
        Config::parse_from(["test"])
    }

    fn service(ns: &str, name: &str, ip: &str) -> ServiceRecord {
        ServiceRecord {
            namespace: ns.into(),
            name: name.into(),
            cluster_ip: Some(ip.into()),
            ports: vec![ServicePortRecord {
                name: None,
                port: 80,
                target_port: Some(80),
                protocol: "TCP".into(),
            }],
            external_name: None,
        }
    }

    fn endpoints(ns: &str, name: &str, addrs: &[&str]) -> EndpointsRecord {
        EndpointsRecord {
            namespace: ns.into(),
            name: name.into(),
            addresses: addrs.iter().map(|a| (a.to_string(), 80)).collect(),
        }
    }

    fn ingress(host: &str, svc: &str) -> ParsedIngress {
        ParsedIngress {
            namespace: "default".into(),
            name: "ing".into(),
            creation_timestamp: chrono::Utc::now(),
            deletion_timestamp: None,
            rules: vec![crate::model::IngressRule {
                host: host.into(),
                paths: vec![IngressPath {
                    path: "/".into(),
                    path_type: PathType::Prefix,
                    backend: crate::model::IngressBackendRef {
                        service_name: svc.into(),
                        service_port: crate::model::ServicePortRef::Number(80),
                    },
                }],
            }],
            default_backend: None,
            tls: vec![],
            raw_annotations: Map::new(),
            bundle: Default::default(),
        }
    }

    #[test]
    fn minimum_ingress_scenario() {
        use crate::annotations::Registry;
        let registry = Registry::standard();
        let c = cfg();
        let mut services = Map::new();
        services.insert("default/s".to_string(), service("default", "s", "10.0.0.1"));
        let mut endpoints_map = Map::new();
        endpoints_map.insert(
            "default/s".to_string(),
            endpoints("default", "s", &["10.1.0.1", "10.1.0.2"]),
        );
        let ingresses = vec![ingress("foo.bar", "s")];
        let input = AssembleInput {
            ingresses: &ingresses,
            services: &services,
            endpoints: &endpoints_map,
            ssl_certs: &[],
            tcp_configmap: None,
            udp_configmap: None,
            controller_pod_count: 1,
        };
        let metrics = crate::metrics::NoopMetricsSink;
        let running = assemble(&input, &c, &registry, &metrics);

        let server = running.servers.iter().find(|s| s.hostname == "foo.bar").unwrap();
        assert_eq!(server.locations.len(), 1);
        assert_eq!(server.locations[0].backend, "default-s-80");
        let backend = running.backends.iter().find(|b| b.name == "default-s-80").unwrap();
        assert_eq!(backend.endpoints.len(), 2);
    }

    #[test]
    fn deterministic_assembly_is_reproducible() {
        use crate::annotations::Registry;
        let registry = Registry::standard();
        let c = cfg();
        let mut services = Map::new();
        services.insert("default/s".to_string(), service("default", "s", "10.0.0.1"));
        let endpoints_map = Map::new();
        let ingresses = vec![ingress("foo.bar", "s")];
        let input = AssembleInput {
            ingresses: &ingresses,
            services: &services,
            endpoints: &endpoints_map,
            ssl_certs: &[],
            tcp_configmap: None,
            udp_configmap: None,
            controller_pod_count: 1,
        };
        let metrics = crate::metrics::NoopMetricsSink;
        let a = assemble(&input, &c, &registry, &metrics);
        let b = assemble(&input, &c, &registry, &metrics);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn catch_all_server_always_present() {
        use crate::annotations::Registry;
        let registry = Registry::standard();
        let c = cfg();
        let services = Map::new();
        let endpoints_map = Map::new();
        let ingresses: Vec<ParsedIngress> = vec![];
        let input = AssembleInput {
            ingresses: &ingresses,
            services: &services,
            endpoints: &endpoints_map,
            ssl_certs: &[],
            tcp_configmap: None,
            udp_configmap: None,
            controller_pod_count: 1,
        };
        let metrics = crate::metrics::NoopMetricsSink;
        let running = assemble(&input, &c, &registry, &metrics);
        assert!(running.servers.iter().any(|s| s.hostname == "_"));
    }
}
