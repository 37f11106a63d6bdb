//! §2.1 Metrics: the runtime's own health — live Adapter Instances, reload
//! outcomes, sandbox rate-limit rejections, and per-hook latency.
//!
//! Hook latency and rate-limit rejections are recorded by whichever caller
//! actually dispatches a hook or exercises a sandbox's rate limiter; in this
//! repo that's the admin API's `/scripts/:id/test` smoke call and the Reload
//! Controller's validation pass. An external proxy front-end (named out of
//! scope in §1) would record request-path hook latency through this same
//! collector.

use chanrt_core::config::VictoriaMetricsConfig;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Metrics collector for the channel runtime.
pub struct MetricsCollector {
    registry: Registry,

    /// Live Adapter Instances (§3), one per registered channel type. Stands
    /// in for VM pool occupancy until a pooled-runtime strategy replaces the
    /// one-runtime-per-type model (see DESIGN.md).
    pub live_adapter_instances: IntGauge,

    /// Catalogue rows currently persisted, sampled on each admin list call.
    pub catalogue_entries: IntGauge,

    /// Reload Controller tick outcomes, by `result` (`success`|`failure`).
    pub reload_outcomes_total: IntCounterVec,

    /// Per-hook dispatch latency, by `hook` and `channel_type`.
    pub hook_latency_seconds: HistogramVec,

    /// Sandbox rate-limit rejections, by `kind` (`http`|`log`).
    pub rate_limit_rejections_total: IntCounterVec,

    /// Admin API request counters, by `route`, `method`, `status`.
    pub admin_requests_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let live_adapter_instances = IntGauge::new(
            "chanrt_live_adapter_instances",
            "Number of live Adapter Instances currently bound to a channel type",
        )?;

        let catalogue_entries = IntGauge::new(
            "chanrt_catalogue_entries",
            "Number of adapter catalogue entries currently persisted",
        )?;

        let reload_outcomes_total = IntCounterVec::new(
            Opts::new(
                "chanrt_reload_outcomes_total",
                "Reload Controller reconciliation outcomes",
            ),
            &["result"],
        )?;

        let hook_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chanrt_hook_latency_seconds",
                "Per-hook dispatch latency (buildUpstreamURL, modifyRequest, isStreamRequest, extractModel, validateKey)",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0,
            ]),
            &["hook", "channel_type"],
        )?;

        let rate_limit_rejections_total = IntCounterVec::new(
            Opts::new(
                "chanrt_rate_limit_rejections_total",
                "Sandbox rate-limit rejections (outbound httpRequest or log volume)",
            ),
            &["kind"],
        )?;

        let admin_requests_total = IntCounterVec::new(
            Opts::new("chanrt_admin_requests_total", "Admin API requests"),
            &["route", "method", "status"],
        )?;

        registry.register(Box::new(live_adapter_instances.clone()))?;
        registry.register(Box::new(catalogue_entries.clone()))?;
        registry.register(Box::new(reload_outcomes_total.clone()))?;
        registry.register(Box::new(hook_latency_seconds.clone()))?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;
        registry.register(Box::new(admin_requests_total.clone()))?;

        Ok(Self {
            registry,
            live_adapter_instances,
            catalogue_entries,
            reload_outcomes_total,
            hook_latency_seconds,
            rate_limit_rejections_total,
            admin_requests_total,
        })
    }

    pub fn record_reload_outcome(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.reload_outcomes_total.with_label_values(&[result]).inc();
    }

    pub fn record_hook_latency(&self, hook: &str, channel_type: &str, seconds: f64) {
        self.hook_latency_seconds
            .with_label_values(&[hook, channel_type])
            .observe(seconds);
    }

    pub fn record_rate_limit_rejection(&self, kind: &str) {
        self.rate_limit_rejections_total.with_label_values(&[kind]).inc();
    }

    pub fn record_admin_request(&self, route: &str, method: &str, status: u16) {
        self.admin_requests_total
            .with_label_values(&[route, method, &status.to_string()])
            .inc();
    }

    pub fn set_live_adapter_instances(&self, n: i64) {
        self.live_adapter_instances.set(n);
    }

    pub fn set_catalogue_entries(&self, n: i64) {
        self.catalogue_entries.set(n);
    }

    /// Prometheus text exposition for `GET /metrics`.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Start the VictoriaMetrics remote-write push loop. A no-op task when
    /// `config.enabled` is false, matching the disabled-by-default posture
    /// the rest of `ObservabilityConfig` carries.
    #[cfg(feature = "victoria")]
    pub fn start_push_loop(
        self: Arc<Self>,
        config: VictoriaMetricsConfig,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !config.enabled {
                return;
            }

            info!(endpoint = %config.endpoint, interval = config.push_interval_secs, "starting VictoriaMetrics push loop");

            let client = reqwest::Client::new();
            let mut tick = interval(Duration::from_secs(config.push_interval_secs));

            loop {
                tick.tick().await;
                let metrics_text = self.gather_text();

                match client
                    .post(&config.endpoint)
                    .header("Content-Type", "text/plain")
                    .body(metrics_text)
                    .send()
                    .await
                {
                    Ok(resp) if !resp.status().is_success() => {
                        error!(status = %resp.status(), "VictoriaMetrics push failed");
                    }
                    Ok(_) => debug!("VictoriaMetrics push successful"),
                    Err(e) => error!(error = %e, "VictoriaMetrics push error"),
                }
            }
        })
    }

    #[cfg(not(feature = "victoria"))]
    pub fn start_push_loop(self: Arc<Self>, _config: VictoriaMetricsConfig) {}
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to construct MetricsCollector: duplicate metric registration")
    }
}
