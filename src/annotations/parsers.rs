//! Concrete per-knob parsers (§4.B).

use std::collections::BTreeMap;

use crate::error::AnnotationError;
use crate::model::{
    AuthConfig, ClientAuthTls, CorsConfig, LoadBalancing, ModulusRule, ProxyConfig,
    RateLimitConfig, RedirectConfig,
};

use super::types::{AnnotationBundle, CanaryBundle, ChecksumBundle, RolloutBundle};
use super::validate::{
    is_valid_cache_duration_entry, is_valid_header_name, is_valid_http_method, is_valid_url,
    DEFAULT_CACHE_DURATION,
};
use super::{get_bool, get_int, get_string, AnnotationParser, ParseContext};

pub struct CanaryParser;
impl AnnotationParser for CanaryParser {
    fn key(&self) -> &'static str {
        "canary"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let enabled = get_bool(ann, ctx, "canary")?;
        if !enabled {
            // configuration-without-enabled is rejected only when canary
            // knobs are actually present; otherwise this is simply absent.
            let any_canary_knob = ["canary-by-header", "canary-by-cookie", "canary-weight"]
                .iter()
                .any(|s| ann.contains_key(&ctx.key(s)));
            if any_canary_knob {
                return Err(AnnotationError::LocationDenied(
                    "canary configuration present without canary: true".into(),
                ));
            }
            bundle.canary = CanaryBundle::default();
            return Ok(());
        }

        let referrer = get_string(ann, ctx, "canary-by-referrer").filter(|s| !s.is_empty());
        if referrer.is_none() {
            return Err(AnnotationError::LocationDenied(
                "canary enabled but referrer is empty".into(),
            ));
        }
        let referrer = referrer.unwrap();
        if !ctx.canary_referrer_allowlist.is_empty()
            && !ctx.canary_referrer_allowlist.iter().any(|r| r == &referrer)
        {
            return Err(AnnotationError::LocationDenied(format!(
                "canary referrer {referrer} not in allowlist"
            )));
        }

        let header = get_string(ann, ctx, "canary-by-header");
        let header_value = get_string(ann, ctx, "canary-by-header-value");
        let header_pattern = get_string(ann, ctx, "canary-by-header-pattern").is_some();
        let cookie = get_string(ann, ctx, "canary-by-cookie");
        let cookie_value = get_string(ann, ctx, "canary-by-cookie-value");
        let query = get_string(ann, ctx, "canary-by-query");
        let query_value = get_string(ann, ctx, "canary-by-query-value");
        let weight = get_int(ann, ctx, "canary-weight")?.map(|v| v.max(0) as u32);
        let weight_total = get_int(ann, ctx, "canary-weight-total")?.map(|v| v.max(0) as u32);
        let modulus = match (
            get_int(ann, ctx, "canary-by-mod-divisor")?,
            get_int(ann, ctx, "canary-by-mod-remainder")?,
        ) {
            (Some(d), Some(r)) if d > 0 => Some(ModulusRule {
                divisor: d as u32,
                remainder: r.max(0) as u32,
            }),
            _ => None,
        };

        bundle.canary = CanaryBundle {
            enabled: true,
            referrer: Some(referrer),
            policy: crate::model::TrafficShapingPolicy {
                header,
                header_value,
                header_pattern,
                cookie,
                cookie_value,
                query,
                query_value,
                modulus,
                weight,
                weight_total,
            },
        };
        Ok(())
    }
}

/// General (non-canary) referrer gate: an ingress carrying a `by-referrer`
/// annotation is only honored if that referrer is in the ingress-referrer
/// allowlist. Checked independently of `CanaryParser`'s own
/// `canary-by-referrer` gate -- the source does not assert any relationship
/// between the two when both are present on the same ingress.
pub struct ByReferrerParser;
impl AnnotationParser for ByReferrerParser {
    fn key(&self) -> &'static str {
        "by-referrer"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        _bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(referrer) = get_string(ann, ctx, "by-referrer").filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        if !ctx.ingress_referrer_allowlist.is_empty()
            && !ctx.ingress_referrer_allowlist.iter().any(|r| r == &referrer)
        {
            return Err(AnnotationError::LocationDenied(format!(
                "ingress referrer {referrer} not in allowlist"
            )));
        }
        Ok(())
    }
}

pub struct GrayParser;
impl AnnotationParser for GrayParser {
    fn key(&self) -> &'static str {
        "gray"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let flag = get_bool(ann, ctx, "gray-release")?;
        let current_ver = get_string(ann, ctx, "gray-current-version");
        let new_ver = get_string(ann, ctx, "gray-new-version");
        let index = get_int(ann, ctx, "gray-deploy-index")?.unwrap_or(-1);
        bundle.rollout = RolloutBundle {
            flag,
            current_ver,
            new_ver,
            index: index as i32,
        };
        Ok(())
    }
}

pub struct ChecksumParser;
impl AnnotationParser for ChecksumParser {
    fn key(&self) -> &'static str {
        "checksum"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.checksum = ChecksumBundle {
            version: get_string(ann, ctx, "version"),
        };
        Ok(())
    }
}

pub struct SslPassthroughParser;
impl AnnotationParser for SslPassthroughParser {
    fn key(&self) -> &'static str {
        "ssl-passthrough"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.ssl_passthrough = get_bool(ann, ctx, "ssl-passthrough")?;
        Ok(())
    }
}

pub struct SessionAffinityParser;
impl AnnotationParser for SessionAffinityParser {
    fn key(&self) -> &'static str {
        "affinity"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.session_affinity = get_string(ann, ctx, "affinity");
        bundle.hash_by = get_string(ann, ctx, "upstream-hash-by");
        Ok(())
    }
}

pub struct LoadBalancingParser;
impl AnnotationParser for LoadBalancingParser {
    fn key(&self) -> &'static str {
        "load-balance"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.load_balancing = match get_string(ann, ctx, "load-balance").as_deref() {
            None => LoadBalancing::RoundRobin,
            Some("ewma") => LoadBalancing::EwmA,
            Some("ip_hash") => LoadBalancing::IpHash,
            Some("consistent_hash") => LoadBalancing::ConsistentHash,
            Some("round_robin") => LoadBalancing::RoundRobin,
            Some(other) => {
                return Err(AnnotationError::InvalidContent {
                    key: ctx.key("load-balance"),
                    reason: format!("unknown algorithm {other:?}"),
                })
            }
        };
        Ok(())
    }
}

pub struct ServiceUpstreamParser;
impl AnnotationParser for ServiceUpstreamParser {
    fn key(&self) -> &'static str {
        "service-upstream"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.service_upstream = get_bool(ann, ctx, "service-upstream")?;
        Ok(())
    }
}

pub struct UseCustomDefBackendParser;
impl AnnotationParser for UseCustomDefBackendParser {
    fn key(&self) -> &'static str {
        "custom-default-backend"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let svc = get_string(ann, ctx, "default-backend");
        bundle.use_custom_def_backend = svc.is_some();
        bundle.default_backend_service = svc;
        Ok(())
    }
}

pub struct CorsParser;
impl AnnotationParser for CorsParser {
    fn key(&self) -> &'static str {
        "cors"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let enabled = get_bool(ann, ctx, "enable-cors")?;
        if !enabled {
            return Ok(());
        }
        let allow_methods: Vec<String> = get_string(ann, ctx, "cors-allow-methods")
            .map(|s| s.split(',').map(|m| m.trim().to_uppercase()).collect())
            .unwrap_or_default();
        for m in &allow_methods {
            if !is_valid_http_method(m) {
                return Err(AnnotationError::InvalidContent {
                    key: ctx.key("cors-allow-methods"),
                    reason: format!("{m:?} is not a valid HTTP method"),
                });
            }
        }
        let allow_headers: Vec<String> = get_string(ann, ctx, "cors-allow-headers")
            .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
            .unwrap_or_default();
        for h in &allow_headers {
            if !is_valid_header_name(h) {
                return Err(AnnotationError::InvalidContent {
                    key: ctx.key("cors-allow-headers"),
                    reason: format!("{h:?} is not a valid header name"),
                });
            }
        }
        bundle.cors = Some(CorsConfig {
            enabled: true,
            allow_origin: get_string(ann, ctx, "cors-allow-origin").unwrap_or_else(|| "*".into()),
            allow_methods,
            allow_headers,
            allow_credentials: get_bool(ann, ctx, "cors-allow-credentials")?,
        });
        Ok(())
    }
}

pub struct RewriteParser;
impl AnnotationParser for RewriteParser {
    fn key(&self) -> &'static str {
        "rewrite-target"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.rewrite_target = get_string(ann, ctx, "rewrite-target");
        Ok(())
    }
}

pub struct RedirectParser;
impl AnnotationParser for RedirectParser {
    fn key(&self) -> &'static str {
        "permanent-redirect"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(url) = get_string(ann, ctx, "permanent-redirect") else {
            return Ok(());
        };
        if !is_valid_url(&url) {
            return Err(AnnotationError::InvalidContent {
                key: ctx.key("permanent-redirect"),
                reason: format!("{url:?} is not a valid URL"),
            });
        }
        let code = get_int(ann, ctx, "permanent-redirect-code")?.unwrap_or(301);
        bundle.redirect = Some(RedirectConfig {
            url,
            code: code as u16,
        });
        Ok(())
    }
}

pub struct RateLimitParser;
impl AnnotationParser for RateLimitParser {
    fn key(&self) -> &'static str {
        "limit-rps"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(rps) = get_int(ann, ctx, "limit-rps")? else {
            return Ok(());
        };
        if rps <= 0 {
            return Err(AnnotationError::InvalidContent {
                key: ctx.key("limit-rps"),
                reason: "must be positive".into(),
            });
        }
        let burst = get_int(ann, ctx, "limit-burst-multiplier")?.unwrap_or(5);
        bundle.rate_limit = Some(RateLimitConfig {
            rps: rps as u32,
            burst_multiplier: burst.max(1) as u32,
        });
        Ok(())
    }
}

pub struct ProxyParser;
impl AnnotationParser for ProxyParser {
    fn key(&self) -> &'static str {
        "proxy"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.proxy = ProxyConfig {
            connect_timeout_s: get_int(ann, ctx, "proxy-connect-timeout")?.map(|v| v as u32),
            send_timeout_s: get_int(ann, ctx, "proxy-send-timeout")?.map(|v| v as u32),
            read_timeout_s: get_int(ann, ctx, "proxy-read-timeout")?.map(|v| v as u32),
            body_size: get_string(ann, ctx, "proxy-body-size"),
            next_upstream: get_string(ann, ctx, "proxy-next-upstream")
                .map(|s| s.split(' ').map(|t| t.to_string()).collect())
                .unwrap_or_default(),
        };
        Ok(())
    }
}

pub struct WhitelistParser;
impl AnnotationParser for WhitelistParser {
    fn key(&self) -> &'static str {
        "whitelist-source-range"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.whitelist = get_string(ann, ctx, "whitelist-source-range")
            .map(|s| s.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default();
        Ok(())
    }
}

pub struct AuthParser;
impl AnnotationParser for AuthParser {
    fn key(&self) -> &'static str {
        "auth-url"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(url) = get_string(ann, ctx, "auth-url") else {
            return Ok(());
        };
        if !is_valid_url(&url) {
            return Err(AnnotationError::LocationDenied(format!(
                "auth-url {url:?} unparsable"
            )));
        }
        let method = get_string(ann, ctx, "auth-method");
        if let Some(m) = &method {
            if !is_valid_http_method(m) {
                return Err(AnnotationError::InvalidContent {
                    key: ctx.key("auth-method"),
                    reason: format!("{m:?} is not a valid HTTP method"),
                });
            }
        }
        bundle.auth = Some(AuthConfig { url, method });
        Ok(())
    }
}

pub struct CustomErrorsParser;
impl AnnotationParser for CustomErrorsParser {
    fn key(&self) -> &'static str {
        "custom-http-errors"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(raw) = get_string(ann, ctx, "custom-http-errors") else {
            return Ok(());
        };
        let mut codes = Vec::new();
        for tok in raw.split(',') {
            match tok.trim().parse::<u16>() {
                Ok(c) => codes.push(c),
                Err(_) => {
                    return Err(AnnotationError::InvalidContent {
                        key: ctx.key("custom-http-errors"),
                        reason: format!("{tok:?} is not a status code"),
                    })
                }
            }
        }
        bundle.custom_errors = codes;
        Ok(())
    }
}

pub struct RobotsParser;
impl AnnotationParser for RobotsParser {
    fn key(&self) -> &'static str {
        "disable-robots"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.robots_disabled = get_bool(ann, ctx, "disable-robots")?;
        Ok(())
    }
}

pub struct ClientAuthTlsParser;
impl AnnotationParser for ClientAuthTlsParser {
    fn key(&self) -> &'static str {
        "auth-tls-secret"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(secret) = get_string(ann, ctx, "auth-tls-secret") else {
            return Ok(());
        };
        bundle.client_auth_tls = Some(ClientAuthTls {
            secret,
            verify_optional: get_bool(ann, ctx, "auth-tls-verify-client-optional")?,
        });
        Ok(())
    }
}

pub struct ServerSnippetParser;
impl AnnotationParser for ServerSnippetParser {
    fn key(&self) -> &'static str {
        "server-snippet"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.server_snippet = get_string(ann, ctx, "server-snippet");
        Ok(())
    }
}

pub struct AliasParser;
impl AnnotationParser for AliasParser {
    fn key(&self) -> &'static str {
        "server-alias"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.aliases = get_string(ann, ctx, "server-alias")
            .map(|s| s.split(',').map(|a| a.trim().to_string()).collect())
            .unwrap_or_default();
        Ok(())
    }
}

pub struct SslCiphersParser;
impl AnnotationParser for SslCiphersParser {
    fn key(&self) -> &'static str {
        "ssl-ciphers"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.ssl_ciphers = get_string(ann, ctx, "ssl-ciphers");
        Ok(())
    }
}

pub struct NeedDefaultCertParser;
impl AnnotationParser for NeedDefaultCertParser {
    fn key(&self) -> &'static str {
        "default-cert"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        bundle.need_default_cert = get_bool(ann, ctx, "default-cert")?;
        Ok(())
    }
}

pub struct CacheDurationParser;
impl AnnotationParser for CacheDurationParser {
    fn key(&self) -> &'static str {
        "proxy-cache-valid"
    }

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError> {
        let Some(raw) = get_string(ann, ctx, "proxy-cache-valid") else {
            bundle.cache_duration = vec![DEFAULT_CACHE_DURATION.to_string()];
            return Ok(());
        };
        let entries: Vec<&str> = raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        if entries.is_empty() {
            bundle.cache_duration = vec![DEFAULT_CACHE_DURATION.to_string()];
            return Ok(());
        }
        for entry in &entries {
            if !is_valid_cache_duration_entry(entry) {
                return Err(AnnotationError::InvalidContent {
                    key: ctx.key("proxy-cache-valid"),
                    reason: format!("{entry:?} is not a valid cache-duration entry"),
                });
            }
        }
        bundle.cache_duration = entries.into_iter().map(|s| s.to_string()).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{DEFAULT_PREFIX, ROLLOUT_PREFIX};

    fn ctx<'a>(referrers: &'a [String], canary_referrers: &'a [String]) -> ParseContext<'a> {
        ParseContext {
            prefix: DEFAULT_PREFIX,
            ingress_referrer_allowlist: referrers,
            canary_referrer_allowlist: canary_referrers,
        }
    }

    #[test]
    fn canary_without_referrer_is_rejected() {
        let mut ann = BTreeMap::new();
        ann.insert(format!("{DEFAULT_PREFIX}/canary"), "true".into());
        let mut bundle = AnnotationBundle::default();
        let empty: Vec<String> = vec![];
        let err = CanaryParser.parse(&ctx(&empty, &empty), &ann, &mut bundle);
        assert!(matches!(err, Err(AnnotationError::LocationDenied(_))));
    }

    #[test]
    fn canary_enabled_with_allowed_referrer() {
        let mut ann = BTreeMap::new();
        ann.insert(format!("{DEFAULT_PREFIX}/canary"), "true".into());
        ann.insert(
            format!("{DEFAULT_PREFIX}/canary-by-referrer"),
            "release-bot".into(),
        );
        let mut bundle = AnnotationBundle::default();
        let allow = vec!["release-bot".to_string()];
        let empty: Vec<String> = vec![];
        CanaryParser
            .parse(&ctx(&empty, &allow), &ann, &mut bundle)
            .unwrap();
        assert!(bundle.canary.enabled);
    }

    #[test]
    fn gray_parser_uses_rollout_prefix() {
        let mut ann = BTreeMap::new();
        ann.insert(format!("{ROLLOUT_PREFIX}/gray-release"), "true".into());
        ann.insert(format!("{ROLLOUT_PREFIX}/gray-deploy-index"), "5".into());
        let mut bundle = AnnotationBundle::default();
        let rctx = ParseContext {
            prefix: ROLLOUT_PREFIX,
            ingress_referrer_allowlist: &[],
            canary_referrer_allowlist: &[],
        };
        GrayParser.parse(&rctx, &ann, &mut bundle).unwrap();
        assert!(bundle.rollout.flag);
        assert_eq!(bundle.rollout.index, 5);
    }

    #[test]
    fn cache_duration_defaults_when_absent() {
        let ann = BTreeMap::new();
        let mut bundle = AnnotationBundle::default();
        let empty: Vec<String> = vec![];
        CacheDurationParser
            .parse(&ctx(&empty, &empty), &ann, &mut bundle)
            .unwrap();
        assert_eq!(bundle.cache_duration, vec![DEFAULT_CACHE_DURATION.to_string()]);
    }
}
