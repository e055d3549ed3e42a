//! Shape validators for annotation values (§4.B).

use once_cell::sync::Lazy;
use regex::Regex;

static HEADER_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(ms|s|m|h|d|w|M|y)$").unwrap());

const HTTP_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];

pub fn is_valid_header_name(s: &str) -> bool {
    HEADER_NAME_RE.is_match(s)
}

pub fn is_valid_http_method(s: &str) -> bool {
    HTTP_METHODS.contains(&s)
}

pub fn is_valid_duration_token(s: &str) -> bool {
    DURATION_RE.is_match(s)
}

/// URL annotations must have a non-empty scheme, non-empty host, and no
/// `..` in the host (§4.B).
pub fn is_valid_url(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once("://") else {
        return false;
    };
    if scheme.is_empty() {
        return false;
    }
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host_only = host.split(':').next().unwrap_or(host);
    !host_only.is_empty() && !host_only.contains("..")
}

/// Default value substituted when the cache-duration list is empty (§4.B).
pub const DEFAULT_CACHE_DURATION: &str = "200 202 401 5m";

/// Validate one cache-duration entry: `[<code> …] <duration …>`. Duration
/// tokens may repeat; codes may not appear after a duration in the same
/// entry.
pub fn is_valid_cache_duration_entry(entry: &str) -> bool {
    let mut seen_duration = false;
    let tokens: Vec<&str> = entry.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }
    for tok in tokens {
        if is_valid_duration_token(tok) {
            seen_duration = true;
        } else if tok.chars().all(|c| c.is_ascii_digit()) && tok.len() == 3 {
            if seen_duration {
                return false;
            }
        } else {
            return false;
        }
    }
    seen_duration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_name_rejects_spaces() {
        assert!(is_valid_header_name("X-Canary"));
        assert!(!is_valid_header_name("X Canary"));
    }

    #[test]
    fn http_method_set_is_closed() {
        assert!(is_valid_http_method("GET"));
        assert!(!is_valid_http_method("FETCH"));
    }

    #[test]
    fn url_requires_scheme_host_and_no_dotdot() {
        assert!(is_valid_url("http://auth.example.com/verify"));
        assert!(!is_valid_url("auth.example.com/verify"));
        assert!(!is_valid_url("http:///verify"));
        assert!(!is_valid_url("http://../verify"));
    }

    #[test]
    fn cache_duration_entries() {
        assert!(is_valid_cache_duration_entry("200 202 401 5m"));
        assert!(is_valid_cache_duration_entry("200 5m 10m"));
        assert!(!is_valid_cache_duration_entry("5m 200"));
        assert!(!is_valid_cache_duration_entry(""));
    }
}
