mod annotations;
mod assemble;
mod checksum;
mod config;
mod crd;
mod error;
mod index;
mod metrics;
mod model;
mod publish;
mod reconcile;
mod rolling;
mod sslcert;
mod watch;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use futures_util::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher;
use kube::{Api, Client};
use tracing::{info, warn};

use crate::annotations::Registry;
use crate::config::Config;
use crate::crd::{print_crds_without_formats, IngressCheckSum, SecretCheckSum};
use crate::error::PublishError;
use crate::index::SecretIngressIndex;
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::model::RunningConfig;
use crate::publish::{DataPlaneControl, TemplateRenderer};
use crate::reconcile::ReconcileWorker;
use crate::watch::events::{Event as WatchEvent, ObjectKind};
use crate::watch::informers::{backoff_schedule, should_enqueue_endpoints_update, should_enqueue_ingress};
use crate::watch::store::StoreSet;

const PEM_DIR: &str = "/etc/tengine-ingress/ssl";

/// Counts down as each non-ingress informer finishes its initial list
/// (`watcher::Event::InitDone`), then wakes anyone waiting on it once
/// (§4.A: "non-ingress informers sync first").
struct SyncGate {
    remaining: AtomicUsize,
    notify: tokio::sync::Notify,
}

impl SyncGate {
    fn new(count: usize) -> Self {
        SyncGate { remaining: AtomicUsize::new(count), notify: tokio::sync::Notify::new() }
    }

    fn mark_synced(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        if self.remaining.load(Ordering::SeqCst) == 0 {
            return;
        }
        self.notify.notified().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    if std::env::var("PRINT_CRD").is_ok() {
        print_crds_without_formats()?;
        return Ok(());
    }

    let cfg = Arc::new(Config::parse());
    let client = build_client(&cfg).await?;
    // §2, §9: ingress/secret informers target the dedicated storage cluster
    // when configured; every other resource stays on the primary context.
    let storage_client = if cfg.use_ingress_storage_cluster {
        build_storage_client(&cfg).await?
    } else {
        client.clone()
    };

    let stores = StoreSet::new();
    let index = Arc::new(SecretIngressIndex::new());
    let registry = Arc::new(Registry::standard());
    let ring = Arc::new(watch::events::RingBuffer::new(1024));
    let metrics = Arc::new(NoopMetricsSink::default());

    let own_pod_name = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default();

    let worker = ReconcileWorker::new(
        stores.clone(),
        cfg.clone(),
        registry.clone(),
        metrics.clone(),
        Arc::new(FlatFileTemplateRenderer),
        Arc::new(SignalFileDataPlane {
            path: cfg.status_tengine_file_path.clone(),
        }),
        &own_pod_name,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sync_gate = Arc::new(SyncGate::new(5));
    let ingress_sync_gate = sync_gate.clone();

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(watch_services(client.clone(), cfg.clone(), stores.clone(), ring.clone(), sync_gate.clone())));
    tasks.push(tokio::spawn(watch_endpoints(client.clone(), cfg.clone(), stores.clone(), ring.clone(), sync_gate.clone())));
    tasks.push(tokio::spawn(watch_configmaps(client.clone(), cfg.clone(), stores.clone(), ring.clone(), sync_gate.clone())));
    tasks.push(tokio::spawn(watch_pods(client.clone(), cfg.clone(), stores.clone(), ring.clone(), sync_gate.clone())));
    tasks.push(tokio::spawn(watch_secrets(
        storage_client.clone(),
        cfg.clone(),
        registry.clone(),
        stores.clone(),
        index.clone(),
        ring.clone(),
        sync_gate.clone(),
        metrics.clone(),
    )));
    if cfg.use_ingress_checksum {
        tasks.push(tokio::spawn(watch_ingress_checksums(client.clone(), stores.clone(), ring.clone())));
    }
    if cfg.use_secret_checksum {
        tasks.push(tokio::spawn(watch_secret_checksums(client.clone(), stores.clone(), ring.clone())));
    }

    let informer_set = watch::informers::InformerSet::default();
    let ingress_client = storage_client.clone();
    let ingress_cfg = cfg.clone();
    let ingress_registry = registry.clone();
    let ingress_stores = stores.clone();
    let ingress_index = index.clone();
    let ingress_ring = ring.clone();
    tasks.push(tokio::spawn(async move {
        informer_set
            .startup(
                || async move {
                    ingress_sync_gate.wait().await;
                    true
                },
                || async move {
                    watch_ingresses(
                        ingress_client,
                        ingress_cfg,
                        ingress_registry,
                        ingress_stores,
                        ingress_index,
                        ingress_ring,
                    )
                    .await;
                },
            )
            .await;
    }));

    let reconcile_handle = tokio::spawn({
        let ring = ring.clone();
        async move {
            worker.run(&ring, shutdown_rx).await;
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();
    for t in tasks {
        t.abort();
    }
    reconcile_handle.await.ok();
    Ok(())
}

async fn build_client(cfg: &Config) -> anyhow::Result<Client> {
    if let Some(kubeconfig) = &cfg.kubeconfig {
        std::env::set_var("KUBECONFIG", kubeconfig);
    }
    Ok(Client::try_default().await?)
}

/// Builds the client for the dedicated storage cluster (§2, §9:
/// "polymorphic cluster-watch source"). Falls back to the primary
/// kubeconfig/in-cluster resolution when no dedicated one is configured.
async fn build_storage_client(cfg: &Config) -> anyhow::Result<Client> {
    let Some(kubeconfig) = &cfg.storage_cluster_kubeconfig else {
        return build_client(cfg).await;
    };
    let kc = kube::config::Kubeconfig::read_from(kubeconfig)?;
    let options = kube::config::KubeConfigOptions::default();
    let client_config = kube::Config::from_custom_kubeconfig(kc, &options).await?;
    Ok(Client::try_from(client_config)?)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

fn scoped_api<K>(client: &Client, namespace: &Option<String>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn object_key(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Option<String> {
    Some(format!("{}/{}", meta.namespace.as_deref()?, meta.name.as_deref()?))
}

/// Sleep on a cycling backoff schedule (§4.A) when a watch stream ends or
/// errors, then restart it.
struct Backoff {
    schedule: Vec<Duration>,
    idx: usize,
}

impl Backoff {
    fn new() -> Self {
        Backoff { schedule: backoff_schedule(), idx: 0 }
    }

    async fn wait(&mut self) {
        let delay = self.schedule[self.idx.min(self.schedule.len() - 1)];
        self.idx += 1;
        tokio::time::sleep(delay).await;
    }

    fn reset(&mut self) {
        self.idx = 0;
    }
}

async fn watch_ingresses(
    client: Client,
    cfg: Arc<Config>,
    registry: Arc<Registry>,
    stores: Arc<StoreSet>,
    index: Arc<SecretIngressIndex>,
    ring: Arc<watch::events::RingBuffer>,
) {
    let tx = ring.sender();
    let mut backoff = Backoff::new();
    loop {
        let api: Api<Ingress> = scoped_api(&client, &cfg.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    handle_ingress_event(event, &cfg, &registry, &stores, &index, &tx).await;
                }
                Ok(None) => {
                    warn!("ingress watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "ingress watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn handle_ingress_event(
    event: watcher::Event<Ingress>,
    cfg: &Config,
    registry: &Registry,
    stores: &StoreSet,
    index: &SecretIngressIndex,
    tx: &tokio::sync::mpsc::Sender<WatchEvent>,
) {
    use watcher::Event::*;
    match event {
        Init => stores.ingresses.clear(),
        InitApply(ing) => apply_ingress(&ing, cfg, registry, stores, index, None).await,
        InitDone => {
            tx.send(WatchEvent::Resynced { kind: ObjectKind::Ingress }).await.ok();
        }
        Apply(ing) => apply_ingress(&ing, cfg, registry, stores, index, Some(tx)).await,
        Delete(ing) => delete_ingress(&ing, stores, index, tx).await,
    }
}

async fn apply_ingress(
    ing: &Ingress,
    cfg: &Config,
    registry: &Registry,
    stores: &StoreSet,
    index: &SecretIngressIndex,
    tx: Option<&tokio::sync::mpsc::Sender<WatchEvent>>,
) {
    let Some(parsed) =
        watch::convert::convert_ingress(ing, registry, &cfg.ingress_referrer, &cfg.canary_referrer)
    else {
        return;
    };
    let key = parsed.key();
    if !should_enqueue_ingress(&parsed, cfg) {
        stores.ingresses.delete(&key);
        index.remove_ingress(&key);
        return;
    }
    index.update_ingress(&key, &watch::convert::referenced_secret_keys(&parsed));
    let is_new = stores.ingresses.get(&key).is_none();
    stores.ingresses.put(key.clone(), parsed);
    if let Some(tx) = tx {
        let event = if is_new {
            WatchEvent::Created { kind: ObjectKind::Ingress, key }
        } else {
            WatchEvent::Updated { kind: ObjectKind::Ingress, key }
        };
        tx.send(event).await.ok();
    }
}

async fn delete_ingress(
    ing: &Ingress,
    stores: &StoreSet,
    index: &SecretIngressIndex,
    tx: &tokio::sync::mpsc::Sender<WatchEvent>,
) {
    let Some(key) = object_key(&ing.metadata) else { return };
    stores.ingresses.delete(&key);
    index.remove_ingress(&key);
    tx.send(WatchEvent::Deleted { kind: ObjectKind::Ingress, key }).await.ok();
}

async fn watch_secrets(
    client: Client,
    cfg: Arc<Config>,
    registry: Arc<Registry>,
    stores: Arc<StoreSet>,
    index: Arc<SecretIngressIndex>,
    ring: Arc<watch::events::RingBuffer>,
    sync_gate: Arc<SyncGate>,
    metrics: Arc<dyn MetricsSink>,
) {
    let tx = ring.sender();
    let mut gate_fired = false;
    let mut backoff = Backoff::new();
    loop {
        let api: Api<Secret> = scoped_api(&client, &cfg.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    if matches!(&event, watcher::Event::InitDone) && !gate_fired {
                        gate_fired = true;
                        sync_gate.mark_synced();
                    }
                    handle_secret_event(event, &cfg, &registry, &stores, &index, &tx, &metrics).await;
                }
                Ok(None) => {
                    warn!("secret watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "secret watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn handle_secret_event(
    event: watcher::Event<Secret>,
    cfg: &Config,
    registry: &Registry,
    stores: &StoreSet,
    index: &SecretIngressIndex,
    tx: &tokio::sync::mpsc::Sender<WatchEvent>,
    metrics: &Arc<dyn MetricsSink>,
) {
    use watcher::Event::*;
    match event {
        Init => stores.secrets.clear(),
        InitApply(secret) => apply_secret(&secret, cfg, registry, stores, index, None, metrics).await,
        InitDone => {
            tx.send(WatchEvent::Resynced { kind: ObjectKind::Secret }).await.ok();
        }
        Apply(secret) => apply_secret(&secret, cfg, registry, stores, index, Some(tx), metrics).await,
        Delete(secret) => {
            let Some(key) = object_key(&secret.metadata) else { return };
            stores.secrets.delete(&key);
            tx.send(WatchEvent::Deleted { kind: ObjectKind::Secret, key }).await.ok();
        }
    }
}

async fn apply_secret(
    secret: &Secret,
    cfg: &Config,
    registry: &Registry,
    stores: &StoreSet,
    index: &SecretIngressIndex,
    tx: Option<&tokio::sync::mpsc::Sender<WatchEvent>>,
    metrics: &Arc<dyn MetricsSink>,
) {
    let Some(parsed) = watch::convert::convert_secret(secret, registry, PEM_DIR) else { return };
    let key = parsed.key();
    let is_referenced = index.is_referenced(&key);
    if !crate::watch::informers::should_enqueue_secret(&key, is_referenced, cfg) {
        return;
    }
    if parsed.is_tls {
        match &parsed.ssl_cert {
            Some(cert) => {
                if let Err(e) = crate::sslcert::write_pem_to_disk(cert).await {
                    warn!(secret = %key, error = %e, "failed to write PEM to disk");
                }
            }
            None => metrics.ssl_cert_verify_fail(&key),
        }
    }
    let is_new = stores.secrets.get(&key).is_none();
    stores.secrets.put(key.clone(), parsed);
    if let Some(tx) = tx {
        let event = if is_new {
            WatchEvent::Created { kind: ObjectKind::Secret, key }
        } else {
            WatchEvent::Updated { kind: ObjectKind::Secret, key }
        };
        tx.send(event).await.ok();
    }
}

async fn watch_services(
    client: Client,
    cfg: Arc<Config>,
    stores: Arc<StoreSet>,
    ring: Arc<watch::events::RingBuffer>,
    sync_gate: Arc<SyncGate>,
) {
    let tx = ring.sender();
    let mut gate_fired = false;
    let mut backoff = Backoff::new();
    loop {
        let api: Api<Service> = scoped_api(&client, &cfg.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    if matches!(&event, watcher::Event::InitDone) && !gate_fired {
                        gate_fired = true;
                        sync_gate.mark_synced();
                    }
                    use watcher::Event::*;
                    match event {
                        Init => stores.services.clear(),
                        InitApply(svc) => {
                            if let Some(rec) = watch::convert::convert_service(&svc) {
                                stores.services.put(format!("{}/{}", rec.namespace, rec.name), rec);
                            }
                        }
                        InitDone => {
                            tx.send(WatchEvent::Resynced { kind: ObjectKind::Service }).await.ok();
                        }
                        Apply(svc) => {
                            if let Some(rec) = watch::convert::convert_service(&svc) {
                                let key = format!("{}/{}", rec.namespace, rec.name);
                                stores.services.put(key.clone(), rec);
                                tx.send(WatchEvent::Updated { kind: ObjectKind::Service, key }).await.ok();
                            }
                        }
                        Delete(svc) => {
                            if let Some(key) = object_key(&svc.metadata) {
                                stores.services.delete(&key);
                                tx.send(WatchEvent::Deleted { kind: ObjectKind::Service, key }).await.ok();
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("service watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "service watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn watch_endpoints(
    client: Client,
    cfg: Arc<Config>,
    stores: Arc<StoreSet>,
    ring: Arc<watch::events::RingBuffer>,
    sync_gate: Arc<SyncGate>,
) {
    let tx = ring.sender();
    let mut gate_fired = false;
    let mut backoff = Backoff::new();
    loop {
        let api: Api<Endpoints> = scoped_api(&client, &cfg.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    if matches!(&event, watcher::Event::InitDone) && !gate_fired {
                        gate_fired = true;
                        sync_gate.mark_synced();
                    }
                    use watcher::Event::*;
                    match event {
                        Init => stores.endpoints.clear(),
                        InitApply(ep) => {
                            if let Some(rec) = watch::convert::convert_endpoints(&ep) {
                                stores.endpoints.put(format!("{}/{}", rec.namespace, rec.name), rec);
                            }
                        }
                        InitDone => {
                            tx.send(WatchEvent::Resynced { kind: ObjectKind::Endpoints }).await.ok();
                        }
                        Apply(ep) => {
                            if let Some(rec) = watch::convert::convert_endpoints(&ep) {
                                let key = format!("{}/{}", rec.namespace, rec.name);
                                let prev_hash = stores
                                    .endpoints
                                    .get(&key)
                                    .map(|p| watch::convert::endpoints_subsets_hash(&p))
                                    .unwrap_or(0);
                                let new_hash = watch::convert::endpoints_subsets_hash(&rec);
                                if should_enqueue_endpoints_update(prev_hash, new_hash) {
                                    stores.endpoints.put(key.clone(), rec);
                                    tx.send(WatchEvent::Updated { kind: ObjectKind::Endpoints, key }).await.ok();
                                } else {
                                    stores.endpoints.put(key, rec);
                                }
                            }
                        }
                        Delete(ep) => {
                            if let Some(key) = object_key(&ep.metadata) {
                                stores.endpoints.delete(&key);
                                tx.send(WatchEvent::Deleted { kind: ObjectKind::Endpoints, key }).await.ok();
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("endpoints watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "endpoints watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn watch_configmaps(
    client: Client,
    cfg: Arc<Config>,
    stores: Arc<StoreSet>,
    ring: Arc<watch::events::RingBuffer>,
    sync_gate: Arc<SyncGate>,
) {
    let tx = ring.sender();
    let mut gate_fired = false;
    let mut backoff = Backoff::new();
    loop {
        let api: Api<ConfigMap> = scoped_api(&client, &cfg.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    if matches!(&event, watcher::Event::InitDone) && !gate_fired {
                        gate_fired = true;
                        sync_gate.mark_synced();
                    }
                    use watcher::Event::*;
                    match event {
                        Init => stores.config_maps.clear(),
                        InitApply(cm) => {
                            if let Some(rec) = watch::convert::convert_configmap(&cm) {
                                stores.config_maps.put(format!("{}/{}", rec.namespace, rec.name), rec);
                            }
                        }
                        InitDone => {
                            tx.send(WatchEvent::Resynced { kind: ObjectKind::ConfigMap }).await.ok();
                        }
                        Apply(cm) => {
                            if let Some(rec) = watch::convert::convert_configmap(&cm) {
                                let key = format!("{}/{}", rec.namespace, rec.name);
                                stores.config_maps.put(key.clone(), rec);
                                tx.send(WatchEvent::Updated { kind: ObjectKind::ConfigMap, key }).await.ok();
                            }
                        }
                        Delete(cm) => {
                            if let Some(key) = object_key(&cm.metadata) {
                                stores.config_maps.delete(&key);
                                tx.send(WatchEvent::Deleted { kind: ObjectKind::ConfigMap, key }).await.ok();
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("configmap watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "configmap watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn watch_pods(
    client: Client,
    cfg: Arc<Config>,
    stores: Arc<StoreSet>,
    ring: Arc<watch::events::RingBuffer>,
    sync_gate: Arc<SyncGate>,
) {
    let tx = ring.sender();
    let mut gate_fired = false;
    let mut backoff = Backoff::new();
    loop {
        let api: Api<Pod> = scoped_api(&client, &cfg.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    if matches!(&event, watcher::Event::InitDone) && !gate_fired {
                        gate_fired = true;
                        sync_gate.mark_synced();
                    }
                    use watcher::Event::*;
                    match event {
                        Init => stores.pods.clear(),
                        InitApply(pod) => {
                            if let Some(rec) = watch::convert::convert_pod(&pod) {
                                stores.pods.put(format!("{}/{}", rec.namespace, rec.name), rec);
                            }
                        }
                        InitDone => {
                            tx.send(WatchEvent::Resynced { kind: ObjectKind::Pod }).await.ok();
                        }
                        Apply(pod) => {
                            if let Some(rec) = watch::convert::convert_pod(&pod) {
                                let key = format!("{}/{}", rec.namespace, rec.name);
                                stores.pods.put(key.clone(), rec);
                                tx.send(WatchEvent::Updated { kind: ObjectKind::Pod, key }).await.ok();
                            }
                        }
                        Delete(pod) => {
                            if let Some(key) = object_key(&pod.metadata) {
                                stores.pods.delete(&key);
                                tx.send(WatchEvent::Deleted { kind: ObjectKind::Pod, key }).await.ok();
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("pod watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "pod watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn watch_ingress_checksums(client: Client, stores: Arc<StoreSet>, ring: Arc<watch::events::RingBuffer>) {
    let tx = ring.sender();
    let mut backoff = Backoff::new();
    loop {
        let api: Api<IngressCheckSum> = Api::all(client.clone());
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    use watcher::Event::*;
                    match event {
                        Init => stores.ingress_checksums.clear(),
                        InitApply(obj) => {
                            if let Some(key) = object_key(&obj.metadata) {
                                stores.ingress_checksums.put(key, obj.spec.inner);
                            }
                        }
                        InitDone => {
                            tx.send(WatchEvent::Resynced { kind: ObjectKind::IngressCheckSum }).await.ok();
                        }
                        Apply(obj) => {
                            if let Some(key) = object_key(&obj.metadata) {
                                stores.ingress_checksums.put(key.clone(), obj.spec.inner);
                                tx.send(WatchEvent::Updated { kind: ObjectKind::IngressCheckSum, key }).await.ok();
                            }
                        }
                        Delete(obj) => {
                            if let Some(key) = object_key(&obj.metadata) {
                                stores.ingress_checksums.delete(&key);
                                tx.send(WatchEvent::Deleted { kind: ObjectKind::IngressCheckSum, key }).await.ok();
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("ingress checksum watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "ingress checksum watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

async fn watch_secret_checksums(client: Client, stores: Arc<StoreSet>, ring: Arc<watch::events::RingBuffer>) {
    let tx = ring.sender();
    let mut backoff = Backoff::new();
    loop {
        let api: Api<SecretCheckSum> = Api::all(client.clone());
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    backoff.reset();
                    use watcher::Event::*;
                    match event {
                        Init => stores.secret_checksums.clear(),
                        InitApply(obj) => {
                            if let Some(key) = object_key(&obj.metadata) {
                                stores.secret_checksums.put(key, obj.spec.inner);
                            }
                        }
                        InitDone => {
                            tx.send(WatchEvent::Resynced { kind: ObjectKind::SecretCheckSum }).await.ok();
                        }
                        Apply(obj) => {
                            if let Some(key) = object_key(&obj.metadata) {
                                stores.secret_checksums.put(key.clone(), obj.spec.inner);
                                tx.send(WatchEvent::Updated { kind: ObjectKind::SecretCheckSum, key }).await.ok();
                            }
                        }
                        Delete(obj) => {
                            if let Some(key) = object_key(&obj.metadata) {
                                stores.secret_checksums.delete(&key);
                                tx.send(WatchEvent::Deleted { kind: ObjectKind::SecretCheckSum, key }).await.ok();
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("secret checksum watch stream ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "secret checksum watch error, reconnecting");
                    break;
                }
            }
        }
        backoff.wait().await;
    }
}

/// Minimal stand-in `TemplateRenderer` (§4.G.5 names the real template
/// engine an external collaborator, out of scope per spec.md §1): emits a
/// stable, debug-derived textual form of the running config so the
/// publisher pipeline is exercisable end to end.
struct FlatFileTemplateRenderer;

#[async_trait]
impl TemplateRenderer for FlatFileTemplateRenderer {
    async fn render(&self, running: &RunningConfig) -> Result<String, PublishError> {
        Ok(format!(
            "# generated, fingerprint={}\n{:#?}",
            running.fingerprint, running
        ))
    }
}

/// Minimal stand-in `DataPlaneControl`: writes the rendered text to
/// `status_tengine_file_path` for `full_reload` and treats dynamic
/// reconfiguration as always succeeding, since the data plane RPC/HTTP
/// surface is an external collaborator out of scope per spec.md §1.
struct SignalFileDataPlane {
    path: String,
}

#[async_trait]
impl DataPlaneControl for SignalFileDataPlane {
    async fn full_reload(&self, rendered: &str) -> Result<(), PublishError> {
        tokio::fs::write(&self.path, rendered)
            .await
            .map_err(|e| PublishError::FullReload(e.to_string()))
    }

    async fn dynamic_reconfigure(&self) -> Result<(), PublishError> {
        Ok(())
    }
}
