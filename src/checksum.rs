//! Checksum admission gate (§4.F).
//!
//! Two independent gates, one for ingresses and one for secrets, share this
//! structure: derive a per-object ID, sort+join the IDs, MD5 the result,
//! and compare against every declared checksum object. A match with any of
//! them means "apply"; no match means "reject."

use md5::{Digest, Md5};

use crate::error::ChecksumError;
use crate::model::CheckSumSpec;

/// Ingress ID = `<numericSuffixOfName>-<ingressVersionAnnotation>`. An
/// ingress without a version annotation is skipped (§4.F).
pub fn ingress_id(name: &str, version: Option<&str>) -> Option<String> {
    let suffix = numeric_suffix(name)?;
    let version = version?;
    Some(format!("{suffix}-{version}"))
}

/// Secret ID = `<numericSuffixOfName>-<secretVersionAnnotation>-<pemSHA>`.
/// Any missing part skips the object (§4.F).
pub fn secret_id(name: &str, version: Option<&str>, pem_sha: Option<&str>) -> Option<String> {
    let suffix = numeric_suffix(name)?;
    let version = version?;
    let pem_sha = pem_sha?;
    Some(format!("{suffix}-{version}-{pem_sha}"))
}

fn numeric_suffix(name: &str) -> Option<String> {
    let digits: String = name.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(digits.chars().rev().collect())
}

/// Sort the supplied IDs, join with no separator semantics beyond
/// concatenation order, and take the MD5 hex digest (§4.F, §8).
pub fn local_checksum(ids: &[String]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort();
    let joined = sorted.join("");
    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of a checksum-gate evaluation (§4.F, §7).
pub struct GateResult {
    pub accepted: bool,
    pub local_checksum: String,
    pub diff_missing_locally: Vec<String>,
    pub diff_missing_declared: Vec<String>,
}

/// Evaluate `local_ids` against every declared checksum object, returning
/// acceptance plus a diff against the *newest* (by timestamp) declared
/// checksum for diagnosis (§4.F).
pub fn evaluate(local_ids: &[String], declared: &[CheckSumSpec]) -> GateResult {
    let local = local_checksum(local_ids);
    let accepted = declared.iter().any(|d| d.checksum == local);

    let primary = declared.iter().max_by_key(|d| d.timestamp.clone());
    let (diff_missing_locally, diff_missing_declared) = match primary {
        Some(primary) => {
            let local_set: std::collections::HashSet<&String> = local_ids.iter().collect();
            let declared_set: std::collections::HashSet<&String> = primary.ids.iter().collect();
            let missing_locally: Vec<String> = declared_set
                .difference(&local_set)
                .map(|s| s.to_string())
                .collect();
            let missing_declared: Vec<String> = local_set
                .difference(&declared_set)
                .map(|s| s.to_string())
                .collect();
            (missing_locally, missing_declared)
        }
        None => (vec![], vec![]),
    };

    GateResult {
        accepted,
        local_checksum: local,
        diff_missing_locally,
        diff_missing_declared,
    }
}

/// Build the typed error for a rejected gate evaluation (§4.F, §7).
pub fn mismatch_error(result: &GateResult) -> ChecksumError {
    ChecksumError::Mismatch {
        local: result.local_checksum.clone(),
        diff: format!(
            "local \\ declared: {:?}, declared \\ local: {:?}",
            result.diff_missing_declared, result.diff_missing_locally
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_id_requires_version() {
        assert_eq!(ingress_id("gateway-ing-7", Some("42")), Some("7-42".to_string()));
        assert_eq!(ingress_id("gateway-ing-7", None), None);
        assert_eq!(ingress_id("gateway-ing", Some("42")), None);
    }

    #[test]
    fn empty_ids_hashes_to_md5_of_empty_string() {
        let expected = {
            let mut hasher = Md5::new();
            hasher.update(b"");
            hex::encode(hasher.finalize())
        };
        assert_eq!(local_checksum(&[]), expected);
    }

    #[test]
    fn matches_any_declared_checksum() {
        let ids = vec!["1-a".to_string(), "2-b".to_string()];
        let local = local_checksum(&ids);
        let declared = vec![
            CheckSumSpec {
                timestamp: "2026-01-01T00:00:00Z".into(),
                checksum: "deadbeef".into(),
                ids: vec![],
            },
            CheckSumSpec {
                timestamp: "2026-01-02T00:00:00Z".into(),
                checksum: local.clone(),
                ids: ids.clone(),
            },
        ];
        let result = evaluate(&ids, &declared);
        assert!(result.accepted);
    }

    #[test]
    fn mismatch_reports_diff_against_latest() {
        let ids = vec!["1-a".to_string()];
        let declared = vec![CheckSumSpec {
            timestamp: "2026-01-02T00:00:00Z".into(),
            checksum: "not-matching".into(),
            ids: vec!["1-a".to_string(), "2-b".to_string()],
        }];
        let result = evaluate(&ids, &declared);
        assert!(!result.accepted);
        assert_eq!(result.diff_missing_locally, vec!["2-b".to_string()]);
        assert!(result.diff_missing_declared.is_empty());
    }
}
