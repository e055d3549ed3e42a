use std::time::Duration;

use clap::Parser;

/// Process flags and primary ConfigMap keys (§6), exhaustive for the core.
#[derive(Debug, Clone, Parser)]
#[command(name = "tengine-ingress", about = "L7 ingress gateway control plane")]
pub struct Config {
    #[arg(long, env = "API_SERVER_HOST")]
    pub api_server_host: Option<String>,
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,
    #[arg(long)]
    pub root_ca_file: Option<String>,
    /// Kubeconfig for the dedicated storage cluster (§2, §9): when
    /// `use_ingress_storage_cluster` is set, the ingress and secret
    /// informers target this context instead of the primary one. Falls
    /// back to the primary `kubeconfig`/in-cluster config when unset.
    #[arg(long, env = "STORAGE_CLUSTER_KUBECONFIG")]
    pub storage_cluster_kubeconfig: Option<String>,
    #[arg(long, default_value = "default/default-http-backend")]
    pub default_service: String,
    #[arg(long)]
    pub namespace: Option<String>,
    #[arg(long)]
    pub default_ssl_certificate: Option<String>,

    #[arg(long, default_value = "tengine-ingress-controller-leader")]
    pub election_id: String,
    #[arg(long, default_value_t = 10)]
    pub sync_rate_limit: u32,
    #[arg(long, default_value_t = false)]
    pub disable_catch_all: bool,

    #[arg(long, default_value_t = 80)]
    pub listen_port_http: u16,
    #[arg(long, default_value_t = 443)]
    pub listen_port_https: u16,
    #[arg(long, default_value_t = 8443)]
    pub listen_port_quic: u16,
    #[arg(long, default_value_t = 10254)]
    pub listen_port_health: u16,
    #[arg(long, default_value_t = 8181)]
    pub listen_port_default: u16,
    #[arg(long, default_value_t = 442)]
    pub listen_port_sslproxy: u16,

    #[arg(long, default_value_t = false)]
    pub enable_ssl_passthrough: bool,
    #[arg(long, default_value_t = false)]
    pub metrics_per_host: bool,
    #[arg(long, default_value_t = true)]
    pub enable_metrics: bool,

    #[arg(long)]
    pub tcp_configmap: Option<String>,
    #[arg(long)]
    pub udp_configmap: Option<String>,

    #[arg(long, default_value_t = false)]
    pub use_ingress_storage_cluster: bool,
    #[arg(long, default_value_t = false)]
    pub use_ingress_checksum: bool,
    #[arg(long, default_value_t = false)]
    pub use_secret_checksum: bool,
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub ingress_shm_size: usize,
    #[arg(long, default_value = "/run/tengine-ingress/shm-service-cfg.lock")]
    pub shm_service_cfg_file_lock: String,
    #[arg(long, default_value = "/run/tengine-ingress/status-tengine")]
    pub status_tengine_file_path: String,

    #[arg(long, default_value_t = 20)]
    pub max_canary_ing_num: usize,
    #[arg(long, default_value_t = 30)]
    pub max_canary_action_num: usize,
    #[arg(long, default_value_t = 10)]
    pub max_canary_header_val_num: usize,
    #[arg(long, default_value_t = 10)]
    pub max_canary_cookie_val_num: usize,
    #[arg(long, default_value_t = 10)]
    pub max_canary_query_val_num: usize,
    #[arg(long, default_value_t = 5)]
    pub max_canary_req_add_header_num: usize,
    #[arg(long, default_value_t = 5)]
    pub max_canary_req_append_header_num: usize,
    #[arg(long, default_value_t = 5)]
    pub max_canary_req_add_query_num: usize,
    #[arg(long, default_value_t = 5)]
    pub max_canary_resp_add_header_num: usize,
    #[arg(long, default_value_t = 5)]
    pub max_canary_resp_append_header_num: usize,
    #[arg(long, default_value_t = 100)]
    pub default_canary_weight_total: u32,
    #[arg(long, default_value_t = 1000)]
    pub max_canary_weight_total: u32,

    #[arg(long, value_delimiter = ',')]
    pub ingress_referrer: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub canary_referrer: Vec<String>,

    /// Logical ingress class this controller reconciles (annotation filter, §4.A).
    #[arg(long, default_value = "tengine")]
    pub ingress_class: String,
}

/// Internal-only ports with no corresponding flag in §6: the pprof
/// profiler, the nginx status page, and the stream (L4) snippet listener.
/// Values follow the teacher-conventional defaults for these surfaces.
const PROFILER_PORT: u16 = 10245;
const STATUS_PORT: u16 = 10246;
const STREAM_PORT: u16 = 10247;

impl Config {
    pub fn shm_segment_name(&self) -> &'static str {
        "ShmServiceCfg"
    }

    pub fn sync_rate_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sync_rate_limit.max(1) as f64)
    }

    /// Ports §4.E rejects L4 stream entries on: HTTP, HTTPS, QUIC,
    /// SSLProxy, Health, Default, profiler, status, stream (spec.md:131).
    pub fn reserved_stream_ports(&self) -> Vec<u16> {
        vec![
            self.listen_port_http,
            self.listen_port_https,
            self.listen_port_quic,
            self.listen_port_health,
            self.listen_port_default,
            self.listen_port_sslproxy,
            PROFILER_PORT,
            STATUS_PORT,
            STREAM_PORT,
        ]
    }
}
