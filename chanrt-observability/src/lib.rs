#[cfg(feature = "prometheus")]
pub mod metrics;

#[cfg(feature = "prometheus")]
pub mod prometheus_exporter;
