//! Derived data model (§3). Raw watched objects (Ingress/Service/Endpoints/
//! Secret/ConfigMap/Pod) come straight from `k8s-openapi`; everything here is
//! produced by the assembler or the annotation registry.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::annotations::types::AnnotationBundle;

/// Rolling (gray) release state for an ingress or secret, relative to one pod (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingState {
    Active,
    ActiveRollout,
    InactiveRollout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathType {
    Exact,
    Prefix,
    ImplementationSpecific,
}

impl PathType {
    pub fn from_k8s(s: Option<&str>) -> Self {
        match s {
            Some("Exact") => PathType::Exact,
            Some("Prefix") => PathType::Prefix,
            _ => PathType::ImplementationSpecific,
        }
    }
}

/// A parsed Ingress: the raw object plus its decorated annotation bundle (§3).
#[derive(Debug, Clone)]
pub struct ParsedIngress {
    pub namespace: String,
    pub name: String,
    pub creation_timestamp: chrono::DateTime<chrono::Utc>,
    pub deletion_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub rules: Vec<IngressRule>,
    pub default_backend: Option<IngressBackendRef>,
    pub tls: Vec<IngressTlsEntry>,
    pub raw_annotations: BTreeMap<String, String>,
    pub bundle: AnnotationBundle,
}

impl ParsedIngress {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone)]
pub struct IngressPath {
    pub path: String,
    pub path_type: PathType,
    pub backend: IngressBackendRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressBackendRef {
    pub service_name: String,
    pub service_port: ServicePortRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePortRef {
    Number(i32),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct IngressTlsEntry {
    pub hosts: Vec<String>,
    pub secret_name: String,
}

/// A parsed Secret carrying its decorated checksum/rollout bundle (§3).
#[derive(Debug, Clone)]
pub struct ParsedSecret {
    pub namespace: String,
    pub name: String,
    pub is_tls: bool,
    pub raw_annotations: BTreeMap<String, String>,
    pub bundle: AnnotationBundle,
    pub ssl_cert: Option<SslCert>,
}

impl ParsedSecret {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Derived TLS material for a Secret (§3).
#[derive(Debug, Clone)]
pub struct SslCert {
    pub secret_key: String,
    pub cn: String,
    pub sans: Vec<String>,
    pub der: Vec<u8>,
    pub pem: String,
    pub ca_pem: Option<String>,
    pub sha_fingerprint: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub pem_path: String,
    pub is_ecc: bool,
}

impl SslCert {
    pub fn matches_host(&self, host: &str) -> bool {
        self.sans.iter().any(|s| host_matches(s, host)) || host_matches(&self.cn, host)
    }

    pub fn expires_within(&self, hours: i64) -> bool {
        let now = chrono::Utc::now();
        (self.expires_at - now) < chrono::Duration::hours(hours)
    }
}

/// Wildcard-aware host match (`*.example.com` matches `foo.example.com`).
pub fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }
    if let Some(rest) = pattern.strip_prefix("*.") {
        if let Some((_, suffix)) = host.split_once('.') {
            return suffix == rest;
        }
    }
    false
}

/// Traffic-shaping selector carried by a canary backend (§3, §4.G).
#[derive(Debug, Clone, Default)]
pub struct TrafficShapingPolicy {
    pub header: Option<String>,
    pub header_value: Option<String>,
    pub header_pattern: bool,
    pub cookie: Option<String>,
    pub cookie_value: Option<String>,
    pub query: Option<String>,
    pub query_value: Option<String>,
    pub modulus: Option<ModulusRule>,
    pub weight: Option<u32>,
    pub weight_total: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct ModulusRule {
    pub divisor: u32,
    pub remainder: u32,
}

#[derive(Debug, Clone)]
pub struct CanaryRef {
    pub target: String,
    pub policy: TrafficShapingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadBalancing {
    RoundRobin,
    EwmA,
    IpHash,
    ConsistentHash,
}

impl Default for LoadBalancing {
    fn default() -> Self {
        LoadBalancing::RoundRobin
    }
}

/// A derived upstream (§3).
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub port: i32,
    pub endpoints: Vec<Endpoint>,
    pub session_affinity: Option<String>,
    pub hash_by: Option<String>,
    pub load_balancing: LoadBalancing,
    pub alternative_backends: Vec<String>,
    pub no_server: bool,
    pub traffic_shaping_policy: Option<TrafficShapingPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: String,
    pub port: i32,
}

/// A derived location (§3).
#[derive(Debug, Clone)]
pub struct Location {
    pub path: String,
    pub path_type: PathType,
    pub backend: String,
    pub canaries: Vec<CanaryRef>,
    pub is_default_backend_placeholder: bool,
    pub knobs: LocationKnobs,
}

/// Annotation-derived per-location knobs (§3). Grouped as one struct; the
/// assembler merges them per location as it walks rules.
#[derive(Debug, Clone, Default)]
pub struct LocationKnobs {
    pub cors: Option<CorsConfig>,
    pub rewrite_target: Option<String>,
    pub redirect: Option<RedirectConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub proxy: ProxyConfig,
    pub whitelist: Vec<String>,
    pub auth: Option<AuthConfig>,
    pub custom_errors: Vec<u16>,
    pub robots_disabled: bool,
    pub client_auth_tls: Option<ClientAuthTls>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origin: String,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone)]
pub struct RedirectConfig {
    pub url: String,
    pub code: u16,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub rps: u32,
    pub burst_multiplier: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub connect_timeout_s: Option<u32>,
    pub send_timeout_s: Option<u32>,
    pub read_timeout_s: Option<u32>,
    pub body_size: Option<String>,
    pub next_upstream: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub url: String,
    pub method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientAuthTls {
    pub secret: String,
    pub verify_optional: bool,
}

/// A derived vhost (§3).
#[derive(Debug, Clone)]
pub struct Server {
    pub hostname: String,
    pub aliases: Vec<String>,
    pub locations: Vec<Location>,
    pub ssl_certs: Vec<SslCert>,
    pub ssl_ciphers: Option<String>,
    pub ssl_protocols: Option<String>,
    pub ssl_passthrough: bool,
    pub need_default_cert: bool,
    pub session_affinity: Option<String>,
    pub cors: Option<CorsConfig>,
    pub server_snippet: Option<String>,
    pub client_auth_tls: Option<ClientAuthTls>,
}

impl Server {
    pub fn new_catch_all(default_backend: &str) -> Self {
        Server {
            hostname: "_".to_string(),
            aliases: vec![],
            locations: vec![Location {
                path: "/".to_string(),
                path_type: PathType::Prefix,
                backend: default_backend.to_string(),
                canaries: vec![],
                is_default_backend_placeholder: true,
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
}

/// A materialized L4 (TCP/UDP) stream service (§4.E "Stream (L4) services").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamService {
    pub listen_port: u16,
    pub protocol: StreamProtocol,
    pub namespace: String,
    pub service: String,
    pub backend_port: ServicePortKey,
    pub proxy_protocol_in: bool,
    pub proxy_protocol_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServicePortKey {
    Number(i32),
    Name(String),
}

/// Immutable snapshot published to the data plane (§3).
#[derive(Debug, Clone)]
pub struct RunningConfig {
    pub servers: Vec<Server>,
    pub backends: Vec<Backend>,
    pub tcp_services: Vec<StreamService>,
    pub udp_services: Vec<StreamService>,
    pub passthrough_backends: Vec<String>,
    pub fingerprint: String,
    pub controller_pod_count: usize,
}

/// Checksum object spec shared by `IngressCheckSum` and `SecretCheckSum` (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CheckSumSpec {
    pub timestamp: String,
    pub checksum: String,
    pub ids: Vec<String>,
}
