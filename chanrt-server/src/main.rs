//! Dynamic Channel Runtime — wires the catalogue, the channel factory, and
//! the reload controller together behind the admin HTTP API (§6.1).
//!
//! The proxied request path itself (the HTTP front-end that terminates
//! `/proxy/<group>/<tail>` and calls the five adapter hooks) is named out of
//! scope in §1; this binary starts only the control plane that owns the
//! channel catalogue.

use chanrt_admin::server::{AdminServer, AdminState};
use chanrt_catalogue::{CatalogueService, InMemoryCatalogueRepository};
use chanrt_factory::ChannelFactory;
use chanrt_observability::metrics::MetricsCollector;
use chanrt_reload::ReloadController;
use chanrt_security::ValidatorLimits;
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chanrtd", version, about = "Dynamic Channel Runtime control plane")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "dynamic channel runtime starting");

    let config = chanrt_core::config::RuntimeConfig::load(cli.config.as_deref())?;
    info!(node_id = %config.node_id, "configuration loaded");

    // ── Control plane wiring ──
    let repository = Arc::new(InMemoryCatalogueRepository::new());
    let catalogue = Arc::new(CatalogueService::with_limits(
        Arc::clone(&repository),
        ValidatorLimits {
            max_source_bytes: config.validator.max_source_bytes,
            max_lines: config.validator.max_lines,
            max_nesting: config.validator.max_nesting,
            max_functions: config.validator.max_functions,
        },
    ));
    let factory = Arc::new(ChannelFactory::new(
        HashMap::new(),
        Arc::clone(&catalogue),
        config.sandbox.clone(),
    ));
    let reload = Arc::new(ReloadController::new(
        Arc::clone(&catalogue),
        Arc::clone(&factory),
        config.sandbox.clone(),
    ));

    // Bring every already-enabled entry up before serving admin traffic.
    reload.reload_all();

    let metrics = Arc::new(MetricsCollector::new()?);
    Arc::clone(&metrics).start_push_loop(config.observability.victoria_metrics.clone());

    let tick_handle = Arc::clone(&reload).spawn(Duration::from_secs(config.reload.tick_secs));

    let admin_state = AdminState {
        catalogue,
        factory,
        reload,
        metrics,
        validator_limits: ValidatorLimits {
            max_source_bytes: config.validator.max_source_bytes,
            max_lines: config.validator.max_lines,
            max_nesting: config.validator.max_nesting,
            max_functions: config.validator.max_functions,
        },
        sandbox_config: config.sandbox.clone(),
    };

    let admin = AdminServer::new(config.admin.clone(), admin_state);

    tokio::select! {
        result = admin.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin API exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping");
        }
    }

    tick_handle.abort();
    Ok(())
}
