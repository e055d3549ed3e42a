//! Upstream (backend) creation (§4.E).

use crate::model::{Backend, Endpoint, IngressBackendRef, LoadBalancing, ServicePortRef};
use crate::watch::store::{EndpointsRecord, ServiceRecord};

/// Stable upstream name `<ns>-<svc>-<port>` (§3).
pub fn backend_name(namespace: &str, service: &str, port: i32) -> String {
    format!("{namespace}-{service}-{port}")
}

/// Resolve the numeric port for a backend ref against a Service's declared
/// ports, handling `ExternalName` by falling back to `port == port` when no
/// named port matches (§4.E).
pub fn resolve_port(service: &ServiceRecord, port_ref: &ServicePortRef) -> Option<i32> {
    match port_ref {
        ServicePortRef::Number(n) => Some(*n),
        ServicePortRef::Name(name) => service
            .ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .map(|p| p.port)
            .or_else(|| {
                service
                    .external_name
                    .as_ref()
                    .and_then(|_| service.ports.first().map(|p| p.port))
            }),
    }
}

/// Build one backend's endpoint list: a single synthetic clusterIP
/// endpoint when `service-upstream` is set, else the expanded endpoint
/// list (§4.E).
pub fn backend_endpoints(
    service: &ServiceRecord,
    endpoints: Option<&EndpointsRecord>,
    port: i32,
    service_upstream: bool,
) -> Vec<Endpoint> {
    if service_upstream {
        return service
            .cluster_ip
            .as_ref()
            .filter(|ip| *ip != "None")
            .map(|ip| {
                vec![Endpoint {
                    address: ip.clone(),
                    port,
                }]
            })
            .unwrap_or_default();
    }
    endpoints
        .map(|ep| {
            ep.addresses
                .iter()
                .map(|(addr, p)| Endpoint {
                    address: addr.clone(),
                    port: *p,
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct BackendSpec<'a> {
    pub backend_ref: &'a IngressBackendRef,
    pub session_affinity: Option<String>,
    pub hash_by: Option<String>,
    pub load_balancing: LoadBalancing,
    pub service_upstream: bool,
    pub no_server: bool,
    pub traffic_shaping_policy: Option<crate::model::TrafficShapingPolicy>,
}

pub fn build_backend(
    namespace: &str,
    service: &ServiceRecord,
    endpoints: Option<&EndpointsRecord>,
    port: i32,
    spec: BackendSpec,
) -> Backend {
    Backend {
        name: backend_name(namespace, &service.name, port),
        port,
        endpoints: backend_endpoints(service, endpoints, port, spec.service_upstream),
        session_affinity: spec.session_affinity,
        hash_by: spec.hash_by,
        load_balancing: spec.load_balancing,
        alternative_backends: Vec::new(),
        no_server: spec.no_server,
        traffic_shaping_policy: spec.traffic_shaping_policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::store::ServicePortRecord;

    fn svc() -> ServiceRecord {
        ServiceRecord {
            namespace: "default".into(),
            name: "s".into(),
            cluster_ip: Some("10.0.0.5".into()),
            ports: vec![ServicePortRecord {
                name: Some("http".into()),
                port: 80,
                target_port: Some(8080),
                protocol: "TCP".into(),
            }],
            external_name: None,
        }
    }

    #[test]
    fn backend_name_is_stable() {
        assert_eq!(backend_name("default", "s", 80), "default-s-80");
    }

    #[test]
    fn service_upstream_synthesizes_single_endpoint() {
        let eps = backend_endpoints(&svc(), None, 80, true);
        assert_eq!(eps, vec![Endpoint { address: "10.0.0.5".into(), port: 80 }]);
    }

    #[test]
    fn named_port_resolves_against_service_ports() {
        let port = resolve_port(&svc(), &ServicePortRef::Name("http".into()));
        assert_eq!(port, Some(80));
    }
}
