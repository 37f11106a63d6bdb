use crate::handlers;
use crate::middleware::{bearer_auth, AuthState};
use chanrt_catalogue::{CatalogueRepository, CatalogueService};
use chanrt_core::config::{AdminConfig, SandboxConfig};
use chanrt_factory::ChannelFactory;
use chanrt_observability::metrics::MetricsCollector;
use chanrt_reload::ReloadController;
use chanrt_security::ValidatorLimits;
use axum::{
    extract::State,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router as AxumRouter,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for the Admin API.
pub struct AdminState<R: CatalogueRepository> {
    pub catalogue: Arc<CatalogueService<R>>,
    pub factory: Arc<ChannelFactory<R>>,
    pub reload: Arc<ReloadController<R>>,
    pub metrics: Arc<MetricsCollector>,
    pub validator_limits: ValidatorLimits,
    pub sandbox_config: SandboxConfig,
}

impl<R: CatalogueRepository> Clone for AdminState<R> {
    fn clone(&self) -> Self {
        Self {
            catalogue: Arc::clone(&self.catalogue),
            factory: Arc::clone(&self.factory),
            reload: Arc::clone(&self.reload),
            metrics: Arc::clone(&self.metrics),
            validator_limits: self.validator_limits,
            sandbox_config: self.sandbox_config.clone(),
        }
    }
}

/// Administrative HTTP API server (§6.1).
pub struct AdminServer<R: CatalogueRepository> {
    config: AdminConfig,
    state: AdminState<R>,
}

impl<R: CatalogueRepository + 'static> AdminServer<R> {
    pub fn new(config: AdminConfig, state: AdminState<R>) -> Self {
        Self { config, state }
    }

    /// Build the Axum router with every §6.1 route.
    pub fn build_router(&self) -> AxumRouter {
        let auth_state = AuthState(self.config.bearer_token.clone());

        let scripts = AxumRouter::new()
            .route("/scripts", get(handlers::scripts::list).post(handlers::scripts::create))
            .route("/scripts/validate", post(handlers::scripts::validate))
            .route("/scripts/test", post(handlers::scripts::test))
            .route("/scripts/reload-all", post(handlers::scripts::reload_all))
            .route("/scripts/active", get(handlers::scripts::active))
            .route(
                "/scripts/{id}",
                get(handlers::scripts::get_one)
                    .put(handlers::scripts::update)
                    .delete(handlers::scripts::delete),
            )
            .route("/scripts/{id}/enable", post(handlers::scripts::enable))
            .route("/scripts/{id}/disable", post(handlers::scripts::disable))
            .route("/scripts/{id}/logs", get(handlers::scripts::logs))
            .route("/scripts/{id}/reload", post(handlers::scripts::reload_one))
            .route("/channel-types", get(handlers::scripts::channel_types))
            .route(
                "/channel-types-with-metadata",
                get(handlers::scripts::channel_types_with_metadata),
            )
            .route_layer(axum_middleware::from_fn_with_state(auth_state, bearer_auth));

        let cors = if self.config.cors_origins.is_empty() {
            CorsLayer::permissive()
        } else {
            let origins: Vec<_> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(origins)
        };

        AxumRouter::new()
            .route("/health", get(handlers::health::health_check))
            .route("/metrics", get(metrics_handler::<R>))
            .merge(scripts)
            .layer(cors)
            .with_state(self.state.clone())
    }

    pub async fn start(self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("admin API disabled");
            return Ok(());
        }

        let addr = self.config.addr;
        let app = self.build_router();

        info!(addr = %addr, "starting admin API server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// §6.1 `GET /metrics`: Prometheus text exposition.
async fn metrics_handler<R: CatalogueRepository + 'static>(State(state): State<AdminState<R>>) -> String {
    chanrt_observability::prometheus_exporter::render_metrics(&state.metrics)
}
