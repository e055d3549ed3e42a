//! Typed values produced by the annotation parser registry (§4.B, §9).
//! `AnnotationBundle` is the named struct with one field per parser that §9
//! requires — assembly reads named fields, never reflection.

use crate::model::{
    AuthConfig, ClientAuthTls, CorsConfig, LoadBalancing, ProxyConfig, RateLimitConfig,
    RedirectConfig, TrafficShapingPolicy,
};

#[derive(Debug, Clone, Default)]
pub struct CanaryBundle {
    pub enabled: bool,
    pub referrer: Option<String>,
    pub policy: TrafficShapingPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutBundle {
    pub flag: bool,
    pub current_ver: Option<String>,
    pub new_ver: Option<String>,
    /// -1 when unset (§4.B).
    pub index: i32,
}

impl RolloutBundle {
    pub fn unset() -> Self {
        RolloutBundle {
            flag: false,
            current_ver: None,
            new_ver: None,
            index: -1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChecksumBundle {
    pub version: Option<String>,
}

/// One field per logical knob (§9: "a named struct with one field per
/// parser"). Parsers populate fields independently; missing annotations
/// leave the neutral default.
#[derive(Debug, Clone, Default)]
pub struct AnnotationBundle {
    pub canary: CanaryBundle,
    pub rollout: RolloutBundle,
    pub checksum: ChecksumBundle,
    pub ssl_passthrough: bool,
    pub session_affinity: Option<String>,
    pub hash_by: Option<String>,
    pub load_balancing: LoadBalancing,
    pub service_upstream: bool,
    pub use_custom_def_backend: bool,
    pub default_backend_service: Option<String>,
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
    pub server_snippet: Option<String>,
    pub aliases: Vec<String>,
    pub ssl_ciphers: Option<String>,
    pub need_default_cert: bool,
    pub cache_duration: Vec<String>,
}
