//! §6.1 catalogue CRUD, validate/test, reload, and channel-type listing
//! handlers.

use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chanrt_catalogue::{CatalogueEntryPatch, CatalogueRepository, NewCatalogueEntry};
use chanrt_core::error::ChannelError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

fn ok(data: Value) -> Response {
    (StatusCode::OK, Json(json!({"success": true, "data": data}))).into_response()
}

fn err_response(e: ChannelError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::from_slice::<Value>(&e.to_json_body()).unwrap())).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateScriptRequest {
    pub name: String,
    pub display_name: String,
    pub author: String,
    pub version: String,
    pub script: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateScriptRequest {
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub script: Option<String>,
    pub config: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateScriptRequest {
    pub script: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TestScriptRequest {
    pub script: String,
}

pub async fn list<R: CatalogueRepository + 'static>(State(state): State<AdminState<R>>) -> Response {
    let entries = state.catalogue.list();
    ok(json!(entries))
}

pub async fn get_one<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
) -> Response {
    match state.catalogue.get(id) {
        Ok(entry) => ok(json!(entry)),
        Err(e) => err_response(e),
    }
}

pub async fn create<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Json(req): Json<CreateScriptRequest>,
) -> Response {
    let result = state.catalogue.create(NewCatalogueEntry {
        name: req.name,
        display_name: req.display_name,
        author: req.author,
        version: req.version,
        script: req.script,
        config: req.config,
    });
    match result {
        Ok(entry) => (StatusCode::CREATED, Json(json!({"success": true, "data": entry}))).into_response(),
        Err(e) => err_response(e),
    }
}

pub async fn update<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
    Json(req): Json<UpdateScriptRequest>,
) -> Response {
    let patch = CatalogueEntryPatch {
        display_name: req.display_name,
        version: req.version,
        script: req.script,
        config: req.config,
    };
    match state.catalogue.update(id, patch) {
        Ok(entry) => ok(json!(entry)),
        Err(e) => err_response(e),
    }
}

pub async fn delete<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
) -> Response {
    match state.catalogue.delete(id) {
        Ok(()) => ok(json!({"deleted": true})),
        Err(e) => err_response(e),
    }
}

pub async fn enable<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
) -> Response {
    match state.catalogue.enable(id) {
        Ok(entry) => {
            if let Err(e) = state.reload.reload_one(id) {
                tracing::warn!(entry_id = id, error = %e, "reload_one failed right after enable");
            }
            ok(json!(entry))
        }
        Err(e) => err_response(e),
    }
}

pub async fn disable<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
) -> Response {
    match state.catalogue.disable(id) {
        Ok(entry) => {
            if let Err(e) = state.reload.reload_one(id) {
                tracing::warn!(entry_id = id, error = %e, "reload_one failed right after disable");
            }
            ok(json!(entry))
        }
        Err(e) => err_response(e),
    }
}

/// §4.1 against the supplied source, without persisting anything.
pub async fn validate<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Json(req): Json<ValidateScriptRequest>,
) -> Response {
    match chanrt_security::validate(&req.script, &state.validator_limits) {
        Ok(validated) => ok(json!({"valid": true, "metadata": validated.metadata})),
        Err(e) => ok(json!({"valid": false, "error": e.0})),
    }
}

/// §4.1 plus an `exports()` smoke call through a throwaway Adapter Instance,
/// so a caller can confirm the whole construction path works, not just
/// static validation.
pub async fn test<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Json(req): Json<TestScriptRequest>,
) -> Response {
    let validated = match chanrt_security::validate(&req.script, &state.validator_limits) {
        Ok(v) => v,
        Err(e) => return ok(json!({"valid": false, "error": e.0})),
    };

    let now = chrono::Utc::now();
    let probe_entry = chanrt_core::catalogue::CatalogueEntry {
        id: 0,
        name: validated.metadata.name.clone(),
        display_name: validated.metadata.name.clone(),
        author: validated.metadata.author.clone(),
        version: validated.metadata.version.clone(),
        channel_type: validated.metadata.channel_type.clone(),
        script: req.script,
        metadata: validated.metadata.clone(),
        config: HashMap::new(),
        status: chanrt_core::catalogue::CatalogueStatus::Disabled,
        last_error: None,
        last_error_at: None,
        created_at: now,
        updated_at: now,
    };

    match chanrt_adapter::AdapterInstance::build(&probe_entry, &state.sandbox_config) {
        Ok(instance) => ok(json!({
            "valid": true,
            "message": "exports() smoke call succeeded",
            "runtime": {
                "channel_type": instance.channel_type(),
                "metadata": instance.metadata(),
            },
        })),
        Err(e) => ok(json!({"valid": false, "error": e.to_string()})),
    }
}

pub async fn logs<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
) -> Response {
    let records = state.reload.recent_logs(id).unwrap_or_default();
    ok(json!(records))
}

pub async fn reload_one<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
    Path(id): Path<u64>,
) -> Response {
    match state.reload.reload_one(id) {
        Ok(()) => {
            state.metrics.record_reload_outcome(true);
            ok(json!({"reloaded": true}))
        }
        Err(e) => {
            state.metrics.record_reload_outcome(false);
            err_response(e)
        }
    }
}

pub async fn reload_all<R: CatalogueRepository + 'static>(State(state): State<AdminState<R>>) -> Response {
    state.reload.reload_all();
    state.metrics.record_reload_outcome(true);
    ok(json!({"reloaded": true}))
}

pub async fn active<R: CatalogueRepository + 'static>(State(state): State<AdminState<R>>) -> Response {
    let active_scripts = state.factory.dynamic_channel_types();
    ok(json!({"active_scripts": active_scripts, "count": active_scripts.len()}))
}

pub async fn channel_types<R: CatalogueRepository + 'static>(State(state): State<AdminState<R>>) -> Response {
    ok(json!(state.factory.all_channel_types()))
}

pub async fn channel_types_with_metadata<R: CatalogueRepository + 'static>(
    State(state): State<AdminState<R>>,
) -> Response {
    let static_types = state.factory.static_channel_types();
    let dynamic_types = state.factory.dynamic_channel_types();
    let enabled_entries = state
        .catalogue
        .list_by_status(chanrt_core::catalogue::CatalogueStatus::Enabled);

    let mut out = Vec::new();
    for channel_type in static_types {
        out.push(json!({
            "type": channel_type,
            "is_script": false,
        }));
    }
    for channel_type in dynamic_types {
        let entry = enabled_entries.iter().find(|e| e.channel_type == channel_type);
        out.push(json!({
            "type": channel_type,
            "is_script": true,
            "display_name": entry.map(|e| e.display_name.clone()),
            "description": entry.map(|e| e.metadata.description.clone()),
            "default_test_model": entry.and_then(|e| e.metadata.default_test_model.clone()),
            "default_validation_endpoint": entry.and_then(|e| e.metadata.default_validation_endpoint.clone()),
            "supported_models": entry.map(|e| e.metadata.supported_models.clone()),
            "required_config": entry.map(|e| e.metadata.required_config.clone()),
        }));
    }
    ok(json!(out))
}
