//! Derives an `SslCert` from a TLS Secret's PEM material (§3, §4.E).

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::model::SslCert;

#[derive(Debug, thiserror::Error)]
pub enum SslCertError {
    #[error("secret has no tls.crt entry")]
    MissingCert,
    #[error("failed to parse PEM: {0}")]
    Pem(String),
    #[error("failed to parse X.509 certificate: {0}")]
    X509(String),
}

/// Parse a leaf certificate (plus optional CA chain) out of the secret's
/// `tls.crt`/`tls.ca.crt` data, deriving CN/SAN/expiry/fingerprint and
/// choosing the on-disk PEM path (§3).
pub fn derive_ssl_cert(
    secret_key: &str,
    cert_pem: &[u8],
    ca_pem: Option<&[u8]>,
    pem_dir: &str,
) -> Result<SslCert, SslCertError> {
    let pems = pem::parse_many(cert_pem).map_err(|e| SslCertError::Pem(e.to_string()))?;
    let leaf_pem = pems.first().ok_or(SslCertError::MissingCert)?;
    let der = leaf_pem.contents().to_vec();

    let (_, cert) =
        X509Certificate::from_der(&der).map_err(|e| SslCertError::X509(e.to_string()))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string();

    let mut sans = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(d) = name {
                    sans.push(d.to_string());
                }
            }
        }
    }

    let expires_at = asn1_time_to_chrono(cert.validity().not_after);

    let mut hasher = Sha256::new();
    hasher.update(&der);
    let sha_fingerprint = format!("{:x}", hasher.finalize());

    // 1.2.840.10045.2.1 is id-ecPublicKey.
    let is_ecc = cert.public_key().algorithm.algorithm.to_string() == "1.2.840.10045.2.1";

    let pem_path = format!(
        "{}/{}.pem",
        pem_dir.trim_end_matches('/'),
        secret_key.replace('/', "_")
    );

    Ok(SslCert {
        secret_key: secret_key.to_string(),
        cn,
        sans,
        der,
        pem: String::from_utf8_lossy(cert_pem).to_string(),
        ca_pem: ca_pem.map(|c| String::from_utf8_lossy(c).to_string()),
        sha_fingerprint,
        expires_at,
        pem_path,
        is_ecc,
    })
}

fn asn1_time_to_chrono(t: ASN1Time) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(t.timestamp(), 0).unwrap_or_else(chrono::Utc::now)
}

/// Writes the leaf cert (plus CA chain, if any) to `cert.pem_path` (§5: "PEM
/// write" is a named suspension point of the reconcile pipeline). Best
/// effort: a write failure is logged by the caller and does not fail the
/// watch-layer apply, since the data plane already has whatever PEM it
/// wrote on a prior successful derive.
pub async fn write_pem_to_disk(cert: &SslCert) -> std::io::Result<()> {
    if let Some(dir) = std::path::Path::new(&cert.pem_path).parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut contents = cert.pem.clone();
    if let Some(ca) = &cert.ca_pem {
        contents.push('\n');
        contents.push_str(ca);
    }
    tokio::fs::write(&cert.pem_path, contents).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_is_an_error() {
        let err = derive_ssl_cert("ns/secret", b"", None, "/var/lib/tengine-ingress/certs");
        assert!(matches!(err, Err(SslCertError::Pem(_)) | Err(SslCertError::MissingCert)));
    }
}
