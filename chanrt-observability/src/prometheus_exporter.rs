use crate::metrics::MetricsCollector;

/// Prometheus exposition endpoint handler (§6.1 `GET /metrics`).
pub fn render_metrics(collector: &MetricsCollector) -> String {
    collector.gather_text()
}
