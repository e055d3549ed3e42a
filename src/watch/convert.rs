//! Raw-object to internal-model conversion (§4.A, §3).
//!
//! The watch layer never hands `k8s-openapi` types to the assembler.
//! Everything crossing that boundary is converted here: annotations are
//! decorated through the registry immediately so `StoreSet` always holds
//! fully-parsed objects (§3: "An Ingress carries a parsed annotation bundle
//! after decoration").

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::annotations::{Registry, DEFAULT_PREFIX};
use crate::model::{
    IngressBackendRef, IngressPath, IngressRule, IngressTlsEntry, ParsedIngress, ParsedSecret,
    PathType, ServicePortRef,
};
use crate::sslcert::derive_ssl_cert;
use crate::watch::store::{ConfigMapRecord, EndpointsRecord, PodRecord, ServicePortRecord, ServiceRecord};

fn k8s_time_to_chrono(t: &Time) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(&t.0.to_rfc3339())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

/// The ingress "version" annotation, read under the same prefix/suffix
/// convention `ChecksumParser` uses for secrets (§4.F) -- there is no
/// dedicated ingress parser for it since it feeds the checksum gate, not
/// the annotation bundle.
pub fn ingress_version_annotation(raw: &BTreeMap<String, String>) -> Option<String> {
    raw.get(&format!("{DEFAULT_PREFIX}/version")).cloned()
}

/// Convert a raw Ingress into the decorated model the watch layer caches.
/// Returns `None` when the object has no namespace, which cannot happen
/// for namespaced resources served by the API server but is handled
/// defensively rather than panicking.
pub fn convert_ingress(
    ing: &Ingress,
    registry: &Registry,
    ingress_referrer_allowlist: &[String],
    canary_referrer_allowlist: &[String],
) -> Option<ParsedIngress> {
    let namespace = ing.metadata.namespace.clone()?;
    let name = ing.metadata.name.clone()?;
    let raw_annotations: BTreeMap<String, String> = ing
        .metadata
        .annotations
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let (bundle, _diagnostics, _hard_reject) =
        registry.parse_ingress(&raw_annotations, ingress_referrer_allowlist, canary_referrer_allowlist);

    let spec = ing.spec.clone().unwrap_or_default();

    let rules = spec
        .rules
        .unwrap_or_default()
        .into_iter()
        .map(|rule| {
            let host = rule.host.unwrap_or_default();
            let paths = rule
                .http
                .map(|http| {
                    http.paths
                        .into_iter()
                        .filter_map(|p| {
                            let backend = convert_backend_ref(&p.backend)?;
                            Some(IngressPath {
                                path: p.path.unwrap_or_else(|| "/".to_string()),
                                path_type: PathType::from_k8s(p.path_type.as_deref()),
                                backend,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            IngressRule { host, paths }
        })
        .collect();

    let default_backend = spec.default_backend.and_then(|b| convert_backend_ref_from_spec(&b));

    let tls = spec
        .tls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| {
            let secret_name = t.secret_name?;
            Some(IngressTlsEntry {
                hosts: t.hosts.unwrap_or_default(),
                secret_name,
            })
        })
        .collect();

    Some(ParsedIngress {
        namespace,
        name,
        creation_timestamp: ing
            .metadata
            .creation_timestamp
            .as_ref()
            .map(k8s_time_to_chrono)
            .unwrap_or_else(chrono::Utc::now),
        deletion_timestamp: ing.metadata.deletion_timestamp.as_ref().map(k8s_time_to_chrono),
        rules,
        default_backend,
        tls,
        raw_annotations,
        bundle,
    })
}

fn convert_backend_ref(
    backend: &k8s_openapi::api::networking::v1::IngressBackend,
) -> Option<IngressBackendRef> {
    let svc = backend.service.as_ref()?;
    let port = svc.port.as_ref()?;
    let service_port = match (&port.number, &port.name) {
        (Some(n), _) => ServicePortRef::Number(*n),
        (None, Some(name)) => ServicePortRef::Name(name.clone()),
        (None, None) => return None,
    };
    Some(IngressBackendRef {
        service_name: svc.name.clone(),
        service_port,
    })
}

fn convert_backend_ref_from_spec(
    backend: &k8s_openapi::api::networking::v1::IngressBackend,
) -> Option<IngressBackendRef> {
    convert_backend_ref(backend)
}

/// Convert a TLS Secret into the decorated model. Non-TLS secrets still
/// get a `ParsedSecret` (for checksum/rollout bundle tracking) but carry
/// no `ssl_cert`.
pub fn convert_secret(secret: &Secret, registry: &Registry, pem_dir: &str) -> Option<ParsedSecret> {
    let namespace = secret.metadata.namespace.clone()?;
    let name = secret.metadata.name.clone()?;
    let raw_annotations: BTreeMap<String, String> = secret
        .metadata
        .annotations
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    let (bundle, _diagnostics) = registry.parse_secret(&raw_annotations);

    let is_tls = secret.type_.as_deref() == Some("kubernetes.io/tls");
    let key = format!("{namespace}/{name}");

    let ssl_cert = if is_tls {
        secret.data.as_ref().and_then(|data| {
            let cert_pem = data.get("tls.crt")?;
            let ca_pem = data.get("ca.crt").map(|b| b.0.as_slice());
            derive_ssl_cert(&key, &cert_pem.0, ca_pem, pem_dir)
                .inspect_err(|e| tracing::warn!(secret = %key, error = %e, "failed to derive ssl cert"))
                .ok()
        })
    } else {
        None
    };

    Some(ParsedSecret {
        namespace,
        name,
        is_tls,
        raw_annotations,
        bundle,
        ssl_cert,
    })
}

/// Secrets a (namespace/name)-keyed ingress references (§4.C): `tls[]`
/// secret names plus the `auth-tls-secret` annotation, each qualified into
/// the ingress's own namespace.
pub fn referenced_secret_keys(ingress: &ParsedIngress) -> Vec<String> {
    let mut keys: Vec<String> = ingress
        .tls
        .iter()
        .map(|t| format!("{}/{}", ingress.namespace, t.secret_name))
        .collect();
    if let Some(client_auth) = &ingress.bundle.client_auth_tls {
        keys.push(format!("{}/{}", ingress.namespace, client_auth.secret));
    }
    keys.sort();
    keys.dedup();
    keys
}

pub fn convert_service(svc: &Service) -> Option<ServiceRecord> {
    let namespace = svc.metadata.namespace.clone()?;
    let name = svc.metadata.name.clone()?;
    let spec = svc.spec.clone().unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| ServicePortRecord {
            name: p.name,
            port: p.port,
            target_port: match p.target_port {
                Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(n)) => Some(n),
                _ => None,
            },
            protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
        })
        .collect();
    Some(ServiceRecord {
        namespace,
        name,
        cluster_ip: spec.cluster_ip,
        ports,
        external_name: spec.external_name,
    })
}

pub fn convert_endpoints(ep: &Endpoints) -> Option<EndpointsRecord> {
    let namespace = ep.metadata.namespace.clone()?;
    let name = ep.metadata.name.clone()?;
    let mut addresses = Vec::new();
    for subset in ep.subsets.clone().unwrap_or_default() {
        let addrs = subset.addresses.unwrap_or_default();
        let ports = subset.ports.unwrap_or_default();
        for addr in &addrs {
            for port in &ports {
                addresses.push((addr.ip.clone(), port.port));
            }
        }
    }
    Some(EndpointsRecord {
        namespace,
        name,
        addresses,
    })
}

/// Hash of an Endpoints object's subset addresses+ports, used to suppress
/// no-op update events (§4.A, `should_enqueue_endpoints_update`).
pub fn endpoints_subsets_hash(record: &EndpointsRecord) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    let mut sorted = record.addresses.clone();
    sorted.sort();
    sorted.hash(&mut hasher);
    hasher.finish()
}

pub fn convert_configmap(cm: &ConfigMap) -> Option<ConfigMapRecord> {
    let namespace = cm.metadata.namespace.clone()?;
    let name = cm.metadata.name.clone()?;
    Some(ConfigMapRecord {
        namespace,
        name,
        data: cm.data.clone().unwrap_or_default().into_iter().collect(),
    })
}

pub fn convert_pod(pod: &Pod) -> Option<PodRecord> {
    let namespace = pod.metadata.namespace.clone()?;
    let name = pod.metadata.name.clone()?;
    Some(PodRecord { namespace, name })
}

pub fn configmap_to_hashmap(cm: &ConfigMapRecord) -> HashMap<String, String> {
    cm.data.clone().into_iter().collect()
}
