//! Stream (L4) service materialization (§4.E).
//!
//! ConfigMap entries of the form `<port>: <ns>/<svc>:<port>[:PROXY[:PROXY]]`
//! are turned into TCP/UDP services. Ports overlapping the controller's
//! reserved set are rejected with a warning; PROXY decoration is TCP-only.

use tracing::warn;

use crate::model::{ServicePortKey, StreamProtocol, StreamService};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StreamParseError {
    #[error("malformed entry {0:?}")]
    Malformed(String),
    #[error("port {0} is reserved")]
    ReservedPort(u16),
    #[error("PROXY protocol decoration is TCP-only")]
    ProxyOnUdp,
}

/// Parse one ConfigMap key/value pair into a `StreamService`.
pub fn parse_entry(
    port_key: &str,
    value: &str,
    protocol: StreamProtocol,
    reserved_ports: &[u16],
) -> Result<StreamService, StreamParseError> {
    let listen_port: u16 = port_key
        .parse()
        .map_err(|_| StreamParseError::Malformed(port_key.to_string()))?;
    if reserved_ports.contains(&listen_port) {
        return Err(StreamParseError::ReservedPort(listen_port));
    }

    let mut parts = value.split(':');
    let ns_svc = parts.next().ok_or_else(|| StreamParseError::Malformed(value.to_string()))?;
    let (namespace, service) = ns_svc
        .split_once('/')
        .ok_or_else(|| StreamParseError::Malformed(value.to_string()))?;
    let backend_port_raw = parts
        .next()
        .ok_or_else(|| StreamParseError::Malformed(value.to_string()))?;
    let backend_port = backend_port_raw
        .parse::<i32>()
        .map(ServicePortKey::Number)
        .unwrap_or_else(|_| ServicePortKey::Name(backend_port_raw.to_string()));

    let decorations: Vec<&str> = parts.collect();
    let proxy_protocol_in = !decorations.is_empty();
    let proxy_protocol_out = decorations.len() > 1;

    if proxy_protocol_in && protocol == StreamProtocol::Udp {
        return Err(StreamParseError::ProxyOnUdp);
    }

    Ok(StreamService {
        listen_port,
        protocol,
        namespace: namespace.to_string(),
        service: service.to_string(),
        backend_port,
        proxy_protocol_in,
        proxy_protocol_out,
    })
}

/// Parse every entry in a ConfigMap's data, skipping (and logging) any
/// that fail, sorted by port (§4.E).
pub fn materialize(
    data: &std::collections::HashMap<String, String>,
    protocol: StreamProtocol,
    reserved_ports: &[u16],
) -> Vec<StreamService> {
    let mut services = Vec::new();
    for (port_key, value) in data {
        match parse_entry(port_key, value, protocol, reserved_ports) {
            Ok(svc) => services.push(svc),
            Err(e) => warn!(port = port_key, error = %e, "dropping stream service entry"),
        }
    }
    services.sort_by_key(|s| s.listen_port);
    services
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_entry() {
        let svc = parse_entry("9000", "default/mysvc:3306", StreamProtocol::Tcp, &[80, 443]).unwrap();
        assert_eq!(svc.listen_port, 9000);
        assert_eq!(svc.namespace, "default");
        assert_eq!(svc.service, "mysvc");
        assert_eq!(svc.backend_port, ServicePortKey::Number(3306));
        assert!(!svc.proxy_protocol_in);
    }

    #[test]
    fn reserved_port_is_rejected() {
        let err = parse_entry("80", "default/mysvc:3306", StreamProtocol::Tcp, &[80, 443]);
        assert_eq!(err, Err(StreamParseError::ReservedPort(80)));
    }

    #[test]
    fn proxy_decoration_is_tcp_only() {
        let err = parse_entry("9000", "default/mysvc:3306:PROXY", StreamProtocol::Udp, &[80]);
        assert_eq!(err, Err(StreamParseError::ProxyOnUdp));
        let ok = parse_entry("9000", "default/mysvc:3306:PROXY", StreamProtocol::Tcp, &[80]).unwrap();
        assert!(ok.proxy_protocol_in);
    }
}
