//! Local indexed caches (§4.A) and the `Store` capability set (§9).
//!
//! Consumers depend on `{Get, List, register_handler}`, not on a concrete
//! client. Two concrete sources — the primary cluster and the "dedicated
//! storage cluster" — can be combined independently per resource type; the
//! `Store` trait itself is source-agnostic.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// A handler invoked on every mutation to a typed store.
pub type Handler<T> = Arc<dyn Fn(&StoreEvent<T>) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum StoreEvent<T> {
    Put(T),
    Delete(String),
}

/// Capability set exposed by a local cache (§9): `Get`, `List`,
/// `register_handler`. Both the primary-cluster and storage-cluster
/// informers write through this same interface.
pub trait Store<T: Clone + Send + Sync + 'static>: Send + Sync {
    fn get(&self, key: &str) -> Option<T>;
    fn list(&self) -> Vec<T>;
    fn put(&self, key: String, value: T);
    fn delete(&self, key: &str) -> Option<T>;
    fn register_handler(&self, handler: Handler<T>);
}

/// The default in-memory implementation: a reader-writer-locked map plus a
/// list of mutation handlers (§5: "informers write, reconciler reads").
pub struct TypedStore<T> {
    items: RwLock<HashMap<String, T>>,
    handlers: RwLock<Vec<Handler<T>>>,
}

impl<T> Default for TypedStore<T> {
    fn default() -> Self {
        TypedStore {
            items: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> for TypedStore<T> {
    fn get(&self, key: &str) -> Option<T> {
        self.items.read().get(key).cloned()
    }

    fn list(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }

    fn put(&self, key: String, value: T) {
        self.items.write().insert(key.clone(), value.clone());
        for handler in self.handlers.read().iter() {
            handler(&StoreEvent::Put(value.clone()));
        }
    }

    fn delete(&self, key: &str) -> Option<T> {
        let removed = self.items.write().remove(key);
        if removed.is_some() {
            for handler in self.handlers.read().iter() {
                handler(&StoreEvent::Delete(key.to_string()));
            }
        }
        removed
    }

    fn register_handler(&self, handler: Handler<T>) {
        self.handlers.write().push(handler);
    }
}

impl<T: Clone> TypedStore<T> {
    /// Drop every cached entry without firing mutation handlers, used when
    /// a watch stream relists from scratch (`watcher::Event::Init`, §4.A).
    pub fn clear(&self) {
        self.items.write().clear();
    }
}

/// Every resource type the watcher caches locally (§4.A).
#[derive(Default)]
pub struct StoreSet {
    pub ingresses: TypedStore<crate::model::ParsedIngress>,
    pub secrets: TypedStore<crate::model::ParsedSecret>,
    pub services: TypedStore<ServiceRecord>,
    pub endpoints: TypedStore<EndpointsRecord>,
    pub config_maps: TypedStore<ConfigMapRecord>,
    pub pods: TypedStore<PodRecord>,
    pub ingress_checksums: TypedStore<crate::model::CheckSumSpec>,
    pub secret_checksums: TypedStore<crate::model::CheckSumSpec>,
}

impl StoreSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all non-deleted ingresses, used as the assembler's input
    /// at the start of every sync (§5: "the assembler always reads the full
    /// snapshot of all stores").
    pub fn ingress_snapshot(&self) -> Vec<crate::model::ParsedIngress> {
        self.ingresses.list()
    }
}

/// Read-only reference data (§3): opaque to the core beyond what the
/// assembler needs.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub namespace: String,
    pub name: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePortRecord>,
    pub external_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServicePortRecord {
    pub name: Option<String>,
    pub port: i32,
    pub target_port: Option<i32>,
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct EndpointsRecord {
    pub namespace: String,
    pub name: String,
    pub addresses: Vec<(String, i32)>,
}

#[derive(Debug, Clone)]
pub struct ConfigMapRecord {
    pub namespace: String,
    pub name: String,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_store_put_get_delete() {
        let store: TypedStore<i32> = TypedStore::default();
        store.put("a".into(), 1);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.list(), vec![1]);
        assert_eq!(store.delete("a"), Some(1));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn handlers_fire_on_mutation() {
        let store: TypedStore<i32> = TypedStore::default();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen2 = seen.clone();
        store.register_handler(Arc::new(move |ev: &StoreEvent<i32>| {
            seen2.write().push(ev.clone());
        }));
        store.put("a".into(), 1);
        store.delete("a");
        assert_eq!(seen.read().len(), 2);
    }
}
