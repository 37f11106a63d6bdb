use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Top-level configuration for the channel runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Node ID (auto-generated if not set)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Security validator configuration
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Sandboxed runtime configuration
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Reload controller configuration
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Deployment mode
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin API listener address
    #[serde(default = "default_admin_addr")]
    pub addr: SocketAddr,

    /// Bearer token required on every admin request
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Enable the admin API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Maximum adapter source size, in bytes
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    /// Maximum source line count
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Maximum brace/block nesting depth
    #[serde(default = "default_max_nesting")]
    pub max_nesting: usize,

    /// Maximum named function definitions
    #[serde(default = "default_max_functions")]
    pub max_functions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum outbound HTTP requests per rolling minute, per instance
    #[serde(default = "default_http_requests_per_minute")]
    pub http_requests_per_minute: u32,

    /// Maximum log records per rolling minute, per instance
    #[serde(default = "default_log_lines_per_minute")]
    pub log_lines_per_minute: u32,

    /// Maximum outbound request body size, in bytes
    #[serde(default = "default_outbound_body_cap")]
    pub outbound_request_body_cap: usize,

    /// Maximum outbound response body size, in bytes (responses are truncated, not rejected)
    #[serde(default = "default_outbound_response_cap")]
    pub outbound_response_body_cap: usize,

    /// Connect timeout for outbound requests, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Total timeout for outbound requests and for a single hook call, in milliseconds
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,

    /// Maximum sandbox call-stack depth
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: u32,

    /// Maximum memory per sandbox VM, in bytes (0 = unlimited)
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: usize,

    /// Ring buffer capacity for retained adapter log lines, per script
    #[serde(default = "default_log_ring_capacity")]
    pub log_ring_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Reconciliation tick interval, in seconds
    #[serde(default = "default_reload_tick_secs")]
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// VictoriaMetrics push configuration
    #[serde(default)]
    pub victoria_metrics: VictoriaMetricsConfig,

    /// Prometheus scrape endpoint configuration
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VictoriaMetricsConfig {
    /// Enable VictoriaMetrics push
    #[serde(default)]
    pub enabled: bool,

    /// Remote write endpoint URL
    #[serde(default = "default_vm_endpoint")]
    pub endpoint: String,

    /// Push interval in seconds
    #[serde(default = "default_push_interval")]
    pub push_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Enable the Prometheus scrape endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Deployment mode: "standalone" (in-process repository) or "clustered" (external repository)
    #[serde(default = "default_mode")]
    pub mode: DeploymentMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Single node, in-process catalogue repository
    Standalone,
    /// Multiple nodes sharing an external catalogue repository
    Clustered,
}

impl Default for DeploymentMode {
    fn default() -> Self {
        Self::Standalone
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file plus environment variable overrides.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["chanrt.yaml", "/etc/chanrt/chanrt.yaml", "config/chanrt.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        // Environment variables override, e.g. CHANRT_SANDBOX__MAX_MEMORY_BYTES
        figment = figment.merge(Env::prefixed("CHANRT_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }

    pub fn is_clustered(&self) -> bool {
        self.deployment.mode == DeploymentMode::Clustered
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
            bearer_token: None,
            enabled: true,
            cors_origins: vec![],
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            max_lines: default_max_lines(),
            max_nesting: default_max_nesting(),
            max_functions: default_max_functions(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            http_requests_per_minute: default_http_requests_per_minute(),
            log_lines_per_minute: default_log_lines_per_minute(),
            outbound_request_body_cap: default_outbound_body_cap(),
            outbound_response_body_cap: default_outbound_response_cap(),
            connect_timeout_ms: default_connect_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
            max_call_depth: default_max_call_depth(),
            max_memory_bytes: default_max_memory(),
            log_ring_capacity: default_log_ring_capacity(),
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_reload_tick_secs(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            victoria_metrics: VictoriaMetricsConfig::default(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

impl Default for VictoriaMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_vm_endpoint(),
            push_interval_secs: default_push_interval(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Standalone,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            admin: AdminConfig::default(),
            validator: ValidatorConfig::default(),
            sandbox: SandboxConfig::default(),
            reload: ReloadConfig::default(),
            observability: ObservabilityConfig::default(),
            deployment: DeploymentConfig::default(),
        }
    }
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_admin_addr() -> SocketAddr {
    "127.0.0.1:9280".parse().unwrap()
}

fn default_max_source_bytes() -> usize {
    1024 * 1024
}

fn default_max_lines() -> usize {
    10_000
}

fn default_max_nesting() -> usize {
    20
}

fn default_max_functions() -> usize {
    100
}

fn default_http_requests_per_minute() -> u32 {
    10
}

fn default_log_lines_per_minute() -> u32 {
    50
}

fn default_outbound_body_cap() -> usize {
    1024 * 1024
}

fn default_outbound_response_cap() -> usize {
    5 * 1024 * 1024
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_total_timeout_ms() -> u64 {
    30_000
}

fn default_max_call_depth() -> u32 {
    100
}

fn default_max_memory() -> usize {
    64 * 1024 * 1024
}

fn default_log_ring_capacity() -> usize {
    200
}

fn default_reload_tick_secs() -> u64 {
    30
}

fn default_vm_endpoint() -> String {
    "http://127.0.0.1:8428/api/v1/write".to_string()
}

fn default_push_interval() -> u64 {
    15
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mode() -> DeploymentMode {
    DeploymentMode::Standalone
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.admin.addr.port(), 9280);
        assert_eq!(cfg.sandbox.http_requests_per_minute, 10);
        assert_eq!(cfg.sandbox.log_lines_per_minute, 50);
        assert_eq!(cfg.validator.max_nesting, 20);
        assert!(!cfg.is_clustered());
    }

    #[test]
    fn test_clustered_mode_detection() {
        let mut cfg = RuntimeConfig::default();
        cfg.deployment.mode = DeploymentMode::Clustered;
        assert!(cfg.is_clustered());
    }
}
