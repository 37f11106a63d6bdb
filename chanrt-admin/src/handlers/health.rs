use axum::response::Json;
use serde_json::{json, Value};

/// §6.1 `GET /health`: liveness probe, process status and version.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
