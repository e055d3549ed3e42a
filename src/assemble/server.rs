//! Server (vhost) creation and TLS binding (§4.E).

use tracing::warn;

use crate::model::{Server, SslCert};

/// Certificate expiry warning threshold (§4.E).
pub const EXPIRY_WARNING_HOURS: i64 = 240;

/// Find or create the server for `host` (`_` for an empty rule host),
/// enforcing one logical `Server` per hostname (§3, §4.E).
pub fn find_or_create_server<'a>(
    servers: &'a mut Vec<Server>,
    host: &str,
    default_backend: &str,
) -> &'a mut Server {
    let hostname = if host.is_empty() { "_" } else { host };
    if let Some(idx) = servers.iter().position(|s| s.hostname == hostname) {
        return &mut servers[idx];
    }
    servers.push(Server::new_catch_all(default_backend));
    let last = servers.last_mut().unwrap();
    last.hostname = hostname.to_string();
    last
}

/// Bind TLS certs to a server for `host` (§4.E): collect certs whose
/// `hosts[]` explicitly name the host; if none, fall back to SAN match
/// then CN match across every available cert. Up to two are kept (one
/// ECC, one RSA). Expiry warnings fire within `EXPIRY_WARNING_HOURS`.
pub fn bind_tls<'a>(
    server: &mut Server,
    host: &str,
    explicit_candidates: impl Iterator<Item = &'a SslCert>,
    all_certs: impl Iterator<Item = &'a SslCert> + Clone,
) -> bool {
    let mut chosen: Vec<&SslCert> = explicit_candidates.collect();

    if chosen.is_empty() {
        let san_matches: Vec<&SslCert> = all_certs.clone().filter(|c| c.matches_host(host)).collect();
        if !san_matches.is_empty() {
            chosen = san_matches;
        } else {
            chosen = all_certs
                .filter(|c| crate::model::host_matches(&c.cn, host))
                .collect();
        }
    }

    let mut ecc = None;
    let mut rsa = None;
    for cert in chosen {
        if cert.is_ecc && ecc.is_none() {
            ecc = Some(cert);
        } else if !cert.is_ecc && rsa.is_none() {
            rsa = Some(cert);
        }
    }

    let mut bound = false;
    for cert in [rsa, ecc].into_iter().flatten() {
        if cert.expires_within(EXPIRY_WARNING_HOURS) {
            warn!(host, cert = %cert.secret_key, "certificate expires within {EXPIRY_WARNING_HOURS}h");
        }
        server.ssl_certs.push(cert.clone());
        bound = true;
    }
    server.ssl_certs.sort_by(|a, b| a.secret_key.cmp(&b.secret_key));

    if !bound {
        server.need_default_cert = true;
    }
    bound
}

/// First-writer-wins merge of server-level annotation knobs; later
/// ingresses attempting to override log a warning (§4.E).
pub fn merge_server_knobs(
    server: &mut Server,
    host: &str,
    session_affinity: Option<&str>,
    aliases: &[String],
    server_snippet: Option<&str>,
    ssl_ciphers: Option<&str>,
    cors: Option<&crate::model::CorsConfig>,
) {
    merge_first_writer_wins(&mut server.session_affinity, session_affinity.map(str::to_string), host, "session-affinity");
    if server.aliases.is_empty() {
        server.aliases = aliases.to_vec();
    } else if !aliases.is_empty() && server.aliases != aliases {
        warn!(host, "server-alias override ignored: first writer wins");
    }
    merge_first_writer_wins(&mut server.server_snippet, server_snippet.map(str::to_string), host, "server-snippet");
    merge_first_writer_wins(&mut server.ssl_ciphers, ssl_ciphers.map(str::to_string), host, "ssl-ciphers");
    if server.cors.is_none() {
        server.cors = cors.cloned();
    } else if cors.is_some() && server.cors.as_ref() != cors {
        warn!(host, "cors override ignored: first writer wins");
    }
}

fn merge_first_writer_wins(slot: &mut Option<String>, incoming: Option<String>, host: &str, knob: &str) {
    match (&slot, &incoming) {
        (None, Some(_)) => *slot = incoming,
        (Some(existing), Some(new)) if existing != new => {
            warn!(host, knob, "override ignored: first writer wins");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn cert(secret_key: &str, is_ecc: bool, sans: Vec<&str>, hours_to_expiry: i64) -> SslCert {
        SslCert {
            secret_key: secret_key.into(),
            cn: sans.first().unwrap_or(&"").to_string(),
            sans: sans.into_iter().map(String::from).collect(),
            der: vec![],
            pem: String::new(),
            ca_pem: None,
            sha_fingerprint: "deadbeef".into(),
            expires_at: Utc::now() + Duration::hours(hours_to_expiry),
            pem_path: "/tmp/x.pem".into(),
            is_ecc,
        }
    }

    #[test]
    fn falls_back_to_default_cert_when_no_secret_matches() {
        let mut server = Server::new_catch_all("default-s-80");
        let certs = vec![cert("ns/other", false, vec!["other.com"], 1000)];
        let bound = bind_tls(&mut server, "foo.bar", std::iter::empty(), certs.iter());
        assert!(!bound);
        assert!(server.need_default_cert);
    }

    #[test]
    fn caps_at_one_ecc_and_one_rsa() {
        let mut server = Server::new_catch_all("default-s-80");
        let certs = vec![
            cert("ns/rsa1", false, vec!["foo.bar"], 1000),
            cert("ns/rsa2", false, vec!["foo.bar"], 1000),
            cert("ns/ecc1", true, vec!["foo.bar"], 1000),
        ];
        bind_tls(&mut server, "foo.bar", std::iter::empty(), certs.iter());
        assert_eq!(server.ssl_certs.len(), 2);
    }
}
