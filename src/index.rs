//! Secret↔Ingress reverse index (§4.C).
//!
//! Rebuilt per ingress on every create/update: delete all prior edges from
//! that ingress, then insert edges derived from `spec.tls[].secretName` and
//! secret-referencing annotations. On secret events the index produces the
//! fan-out list of ingresses that must be re-parsed.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

#[derive(Default)]
struct Inner {
    /// secret-key -> set of ingress-keys referencing it
    secret_to_ingresses: HashMap<String, HashSet<String>>,
    /// ingress-key -> set of secret-keys it references (for cheap teardown)
    ingress_to_secrets: HashMap<String, HashSet<String>>,
}

/// Bidirectional mapping guarded by a single lock; writes happen on the
/// watch layer, reads happen on the reconcile worker and the admission
/// webhook (external).
#[derive(Default)]
pub struct SecretIngressIndex {
    inner: RwLock<Inner>,
}

impl SecretIngressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all edges owned by `ingress_key` with `secret_keys`.
    pub fn update_ingress(&self, ingress_key: &str, secret_keys: &[String]) {
        let mut inner = self.inner.write();
        if let Some(prev) = inner.ingress_to_secrets.remove(ingress_key) {
            for secret_key in prev {
                if let Some(set) = inner.secret_to_ingresses.get_mut(&secret_key) {
                    set.remove(ingress_key);
                    if set.is_empty() {
                        inner.secret_to_ingresses.remove(&secret_key);
                    }
                }
            }
        }
        let new_secrets: HashSet<String> = secret_keys.iter().cloned().collect();
        for secret_key in &new_secrets {
            inner
                .secret_to_ingresses
                .entry(secret_key.clone())
                .or_default()
                .insert(ingress_key.to_string());
        }
        if !new_secrets.is_empty() {
            inner
                .ingress_to_secrets
                .insert(ingress_key.to_string(), new_secrets);
        }
    }

    /// Purge all edges owned by `ingress_key` (ingress delete).
    pub fn remove_ingress(&self, ingress_key: &str) {
        self.update_ingress(ingress_key, &[]);
    }

    /// The set of ingress-keys currently depending on `secret_key`.
    pub fn reference(&self, secret_key: &str) -> HashSet<String> {
        self.inner
            .read()
            .secret_to_ingresses
            .get(secret_key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_referenced(&self, secret_key: &str) -> bool {
        self.inner
            .read()
            .secret_to_ingresses
            .get(secret_key)
            .is_some_and(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_index_tracks_current_edges_only() {
        let idx = SecretIngressIndex::new();
        idx.update_ingress("ns/ing-a", &["ns/secret-1".to_string()]);
        idx.update_ingress("ns/ing-b", &["ns/secret-1".to_string()]);
        assert_eq!(
            idx.reference("ns/secret-1"),
            ["ns/ing-a".to_string(), "ns/ing-b".to_string()]
                .into_iter()
                .collect()
        );

        // ing-a now references secret-2 instead; the stale edge is purged.
        idx.update_ingress("ns/ing-a", &["ns/secret-2".to_string()]);
        assert_eq!(
            idx.reference("ns/secret-1"),
            ["ns/ing-b".to_string()].into_iter().collect()
        );
        assert_eq!(
            idx.reference("ns/secret-2"),
            ["ns/ing-a".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn delete_purges_all_edges() {
        let idx = SecretIngressIndex::new();
        idx.update_ingress("ns/ing-a", &["ns/secret-1".to_string()]);
        idx.remove_ingress("ns/ing-a");
        assert!(idx.reference("ns/secret-1").is_empty());
        assert!(!idx.is_referenced("ns/secret-1"));
    }
}
