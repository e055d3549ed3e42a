//! Annotation parser registry (§4.B, §9).
//!
//! A registry maps a logical knob name to a parser. Each parser consumes
//! either a full Ingress or a full Secret annotation map and produces a
//! typed value merged into a fixed `AnnotationBundle`. Missing annotations
//! are neutral; invalid ones are reported but (mostly) non-fatal.

pub mod parsers;
pub mod types;
pub mod validate;

use std::collections::BTreeMap;

use crate::error::AnnotationError;

use self::types::AnnotationBundle;

/// Default annotation key prefix (§4.B). Rollout annotations are parsed
/// under a different, transient prefix and then restored.
pub const DEFAULT_PREFIX: &str = "nginx.ingress.kubernetes.io";
pub const ROLLOUT_PREFIX: &str = "tengine.taobao.org";

pub struct ParseContext<'a> {
    pub prefix: &'a str,
    pub ingress_referrer_allowlist: &'a [String],
    pub canary_referrer_allowlist: &'a [String],
}

impl<'a> ParseContext<'a> {
    pub fn key(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }
}

pub fn get_string(ann: &BTreeMap<String, String>, ctx: &ParseContext, suffix: &str) -> Option<String> {
    ann.get(&ctx.key(suffix)).cloned()
}

pub fn get_bool(ann: &BTreeMap<String, String>, ctx: &ParseContext, suffix: &str) -> Result<bool, AnnotationError> {
    match ann.get(&ctx.key(suffix)) {
        None => Ok(false),
        Some(v) => v.trim().parse::<bool>().map_err(|_| AnnotationError::InvalidContent {
            key: ctx.key(suffix),
            reason: format!("{v:?} is not a boolean"),
        }),
    }
}

pub fn get_int(ann: &BTreeMap<String, String>, ctx: &ParseContext, suffix: &str) -> Result<Option<i64>, AnnotationError> {
    match ann.get(&ctx.key(suffix)) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AnnotationError::InvalidContent {
                key: ctx.key(suffix),
                reason: format!("{v:?} is not an integer"),
            }),
    }
}

/// A single logical-knob parser, consuming either an Ingress's or a
/// Secret's annotation map and merging its typed value into `bundle`.
///
/// Returns `Ok(())` when parsing succeeded (including the neutral-default
/// case of a missing annotation). `Err(AnnotationError::InvalidContent)` is
/// non-fatal and is collected by the registry as a diagnostic. Any other
/// error variant is a hard prerequisite failure that the caller must treat
/// as rejecting the containing object or rule (§7).
pub trait AnnotationParser: Send + Sync {
    fn key(&self) -> &'static str;

    fn parse(
        &self,
        ctx: &ParseContext,
        ann: &BTreeMap<String, String>,
        bundle: &mut AnnotationBundle,
    ) -> Result<(), AnnotationError>;
}

pub struct Registry {
    ingress_parsers: Vec<Box<dyn AnnotationParser>>,
    secret_parsers: Vec<Box<dyn AnnotationParser>>,
}

impl Registry {
    pub fn standard() -> Self {
        use self::parsers::*;
        Registry {
            ingress_parsers: vec![
                Box::new(CanaryParser),
                Box::new(ByReferrerParser),
                Box::new(SslPassthroughParser),
                Box::new(SessionAffinityParser),
                Box::new(LoadBalancingParser),
                Box::new(ServiceUpstreamParser),
                Box::new(UseCustomDefBackendParser),
                Box::new(CorsParser),
                Box::new(RewriteParser),
                Box::new(RedirectParser),
                Box::new(RateLimitParser),
                Box::new(ProxyParser),
                Box::new(WhitelistParser),
                Box::new(AuthParser),
                Box::new(CustomErrorsParser),
                Box::new(RobotsParser),
                Box::new(ClientAuthTlsParser),
                Box::new(ServerSnippetParser),
                Box::new(AliasParser),
                Box::new(SslCiphersParser),
                Box::new(NeedDefaultCertParser),
                Box::new(CacheDurationParser),
                Box::new(GrayParser),
            ],
            secret_parsers: vec![Box::new(ChecksumParser), Box::new(GrayParser)],
        }
    }

    /// Parse an Ingress's annotation map into a bundle, returning the
    /// non-fatal diagnostics plus any hard rejection.
    pub fn parse_ingress(
        &self,
        ann: &BTreeMap<String, String>,
        ingress_referrer_allowlist: &[String],
        canary_referrer_allowlist: &[String],
    ) -> (AnnotationBundle, Vec<AnnotationError>, Option<AnnotationError>) {
        let mut bundle = AnnotationBundle::default();
        let ctx = ParseContext {
            prefix: DEFAULT_PREFIX,
            ingress_referrer_allowlist,
            canary_referrer_allowlist,
        };
        let mut diagnostics = Vec::new();
        let mut hard_reject = None;

        for parser in &self.ingress_parsers {
            let ctx = if parser.key() == "gray" {
                ParseContext {
                    prefix: ROLLOUT_PREFIX,
                    ..ctx_ref(&ctx)
                }
            } else {
                ctx_ref(&ctx)
            };
            match parser.parse(&ctx, ann, &mut bundle) {
                Ok(()) => {}
                Err(e @ AnnotationError::InvalidContent { .. }) => diagnostics.push(e),
                Err(e) => {
                    hard_reject = Some(e);
                    break;
                }
            }
        }
        (bundle, diagnostics, hard_reject)
    }

    pub fn parse_secret(
        &self,
        ann: &BTreeMap<String, String>,
    ) -> (AnnotationBundle, Vec<AnnotationError>) {
        let mut bundle = AnnotationBundle::default();
        let base_ctx = ParseContext {
            prefix: DEFAULT_PREFIX,
            ingress_referrer_allowlist: &[],
            canary_referrer_allowlist: &[],
        };
        let mut diagnostics = Vec::new();
        for parser in &self.secret_parsers {
            let ctx = if parser.key() == "gray" {
                ParseContext {
                    prefix: ROLLOUT_PREFIX,
                    ..ctx_ref(&base_ctx)
                }
            } else {
                ctx_ref(&base_ctx)
            };
            if let Err(e) = parser.parse(&ctx, ann, &mut bundle) {
                diagnostics.push(e);
            }
        }
        (bundle, diagnostics)
    }
}

fn ctx_ref<'a>(ctx: &ParseContext<'a>) -> ParseContext<'a> {
    ParseContext {
        prefix: ctx.prefix,
        ingress_referrer_allowlist: ctx.ingress_referrer_allowlist,
        canary_referrer_allowlist: ctx.canary_referrer_allowlist,
    }
}
