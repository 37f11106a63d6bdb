//! §4.3 Adapter Instance: owns exactly one Sandboxed Runtime and the object
//! returned by calling its `exports()` function once. Hook dispatch marshals
//! every argument across the host/sandbox boundary by value, never by
//! reference, and enforces the per-hook failure semantics of §4.3.

use chanrt_core::catalogue::{AdapterMetadata, CatalogueEntry};
use chanrt_core::config::SandboxConfig;
use chanrt_core::context::{is_denylisted_header, is_valid_header_value, AdapterRequest, RequestContext};
use chanrt_core::error::ChannelError;
use chanrt_core::group::Group;
use chanrt_sandbox::json_bridge::{json_to_lua, lua_to_json};
use chanrt_sandbox::SandboxRuntime;
use mlua::Value as LuaValue;
use std::sync::Mutex;
use std::time::Duration;

const REQUIRED_HOOKS: &[&str] = &[
    "buildUpstreamURL",
    "modifyRequest",
    "isStreamRequest",
    "extractModel",
    "validateKey",
];

/// Result of `validateKey`, matching the `{valid, error?}` contract of §3.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidateKeyResult {
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ValidateKeyResult {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
        }
    }
}

/// The in-memory compiled adapter of §3: one Sandboxed Runtime plus the
/// table its `exports()` returned. All five hooks are called through the
/// single internal mutex, serialising every entry point on this instance
/// (§5: an Adapter Instance handles one call at a time).
pub struct AdapterInstance {
    channel_type: String,
    metadata: AdapterMetadata,
    sandbox: SandboxRuntime,
    adapter: Mutex<mlua::Table>,
    total_timeout: Duration,
}

impl AdapterInstance {
    /// Builds a fresh Adapter Instance from a catalogue entry that has
    /// already passed `chanrt_security::validate`. Runs the source once at
    /// top level, calls `exports()` once, and retains the resulting table.
    pub fn build(entry: &CatalogueEntry, config: &SandboxConfig) -> Result<Self, ChannelError> {
        let sandbox = SandboxRuntime::new(entry.name.clone(), config)
            .map_err(|e| ChannelError::Compile(format!("{}: sandbox setup failed: {e}", entry.name)))?;

        sandbox
            .lua()
            .load(&entry.script)
            .set_name(&entry.name)
            .exec()
            .map_err(|e| ChannelError::Compile(format!("{}: top-level execution failed: {e}", entry.name)))?;

        let exports: mlua::Function = sandbox
            .lua()
            .globals()
            .get("exports")
            .map_err(|_| ChannelError::Compile(format!("{}: missing global `exports`", entry.name)))?;

        let adapter_table: mlua::Table = exports
            .call(())
            .map_err(|e| ChannelError::Compile(format!("{}: exports() raised an error: {e}", entry.name)))?;

        for hook in REQUIRED_HOOKS {
            let v: LuaValue = adapter_table
                .get(*hook)
                .map_err(|e| ChannelError::Compile(format!("{}: {e}", entry.name)))?;
            if !matches!(v, LuaValue::Function(_)) {
                return Err(ChannelError::Compile(format!(
                    "{}: exports() result is missing required hook `{hook}`",
                    entry.name
                )));
            }
        }

        Ok(Self {
            channel_type: entry.channel_type.clone(),
            metadata: entry.metadata.clone(),
            sandbox,
            adapter: Mutex::new(adapter_table),
            total_timeout: Duration::from_millis(config.total_timeout_ms),
        })
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    pub fn script_name(&self) -> &str {
        self.sandbox.script_name()
    }

    pub fn recent_logs(&self) -> Vec<chanrt_sandbox::LogRecord> {
        self.sandbox.recent_logs()
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    fn get_hook(&self, table: &mlua::Table, name: &str) -> Result<mlua::Function, ChannelError> {
        table
            .get(name)
            .map_err(|e| ChannelError::Hook {
                hook: name.to_string(),
                message: e.to_string(),
            })
    }

    fn group_to_lua(&self, group: &Group) -> Result<LuaValue, ChannelError> {
        let json = serde_json::to_value(group).map_err(ChannelError::Serde)?;
        json_to_lua(self.sandbox.lua(), &json)
            .map_err(|e| ChannelError::Internal(format!("failed to marshal group: {e}")))
    }

    /// `buildUpstreamURL(original_url, group) -> absolute_url_string`.
    /// Throwing or returning a non-string is fatal to the request but does
    /// not mark this instance unhealthy.
    pub fn build_upstream_url(&self, original_url: &str, group: &Group) -> Result<String, ChannelError> {
        let table = self.adapter.lock().expect("adapter mutex poisoned");
        let f = self.get_hook(&table, "buildUpstreamURL")?;
        let group_lua = self.group_to_lua(group)?;

        let result: mlua::Result<LuaValue> = f.call((original_url.to_string(), group_lua));
        match result {
            Ok(LuaValue::String(s)) => Ok(s.to_string_lossy().to_string()),
            Ok(_) => Err(ChannelError::Hook {
                hook: "buildUpstreamURL".to_string(),
                message: "must return a string".to_string(),
            }),
            Err(e) => Err(ChannelError::Hook {
                hook: "buildUpstreamURL".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// `modifyRequest(request, api_key, group) -> void`. The fresh sandbox
    /// request object is the same Lua table the adapter mutates in place;
    /// after the call, headers and an optional string body are re-applied
    /// to the host-side request, dropping denylisted headers on reapplication.
    pub fn modify_request(
        &self,
        request: &mut AdapterRequest,
        api_key: &str,
        group: &Group,
    ) -> Result<(), ChannelError> {
        let table = self.adapter.lock().expect("adapter mutex poisoned");
        let f = self.get_hook(&table, "modifyRequest")?;
        let lua = self.sandbox.lua();

        let request_table = lua.create_table().map_err(|e| {
            ChannelError::Internal(format!("failed to build request object: {e}"))
        })?;
        request_table.set("method", request.method.clone()).ok();
        request_table.set("url", request.url.clone()).ok();
        let headers_table = lua.create_table().map_err(|e| {
            ChannelError::Internal(format!("failed to build headers object: {e}"))
        })?;
        for (k, v) in &request.headers {
            headers_table.set(k.clone(), v.clone()).ok();
        }
        request_table.set("headers", headers_table).ok();
        let query_table = lua.create_table().map_err(|e| {
            ChannelError::Internal(format!("failed to build query object: {e}"))
        })?;
        for (k, v) in &request.query {
            query_table.set(k.clone(), v.clone()).ok();
        }
        request_table.set("query", query_table).ok();
        if let Some(body) = &request.body {
            request_table.set("body", body.clone()).ok();
        }

        let group_lua = self.group_to_lua(group)?;

        let result: mlua::Result<()> = f.call((request_table.clone(), api_key.to_string(), group_lua));
        if let Err(e) = result {
            tracing::error!(hook = "modifyRequest", script = self.script_name(), error = %e, "adapter hook raised");
            return Err(ChannelError::Hook {
                hook: "modifyRequest".to_string(),
                message: e.to_string(),
            });
        }

        if let Ok(new_headers) = request_table.get::<mlua::Table>("headers") {
            let mut applied = std::collections::HashMap::new();
            if let Ok(pairs) = new_headers.pairs::<String, String>().collect::<Result<Vec<_>, _>>() {
                for (name, value) in pairs {
                    if is_denylisted_header(&name) {
                        continue;
                    }
                    if !is_valid_header_value(&value) {
                        continue;
                    }
                    applied.insert(name, value);
                }
            }
            request.headers = applied;
        }

        if let Ok(LuaValue::String(s)) = request_table.get::<LuaValue>("body") {
            request.body = Some(s.to_string_lossy().to_string());
        }

        Ok(())
    }

    /// Builds the per-call context object. `body_bytes` is marshalled as a
    /// string (lossily, for non-UTF-8 bodies) rather than through the
    /// generic `Vec<u8>` JSON encoding, so adapters can feed it straight
    /// into `utils.parseJSON` instead of reassembling a byte array (§4.3).
    fn context_to_lua(&self, context: &RequestContext) -> Result<LuaValue, ChannelError> {
        let mut json = serde_json::json!({
            "request": serde_json::to_value(&context.request).map_err(ChannelError::Serde)?,
            "original_url": context.original_url,
        });
        json["body_bytes"] = serde_json::Value::String(
            String::from_utf8_lossy(&context.body_bytes).into_owned(),
        );
        json_to_lua(self.sandbox.lua(), &json)
            .map_err(|e| ChannelError::Internal(format!("failed to marshal context: {e}")))
    }

    /// `isStreamRequest(context) -> boolean`. Throwing or returning a
    /// non-boolean is treated as `false`.
    pub fn is_stream_request(&self, context: &RequestContext) -> bool {
        let table = match self.adapter.lock() {
            Ok(t) => t,
            Err(_) => return false,
        };
        let Ok(f) = self.get_hook(&table, "isStreamRequest") else {
            return false;
        };
        let Ok(ctx_lua) = self.context_to_lua(context) else {
            return false;
        };
        let result: mlua::Result<LuaValue> = f.call(ctx_lua);
        match result {
            Ok(LuaValue::Boolean(b)) => b,
            _ => false,
        }
    }

    /// `extractModel(context) -> string`. Throwing or returning a non-string
    /// is treated as `""`.
    pub fn extract_model(&self, context: &RequestContext) -> String {
        let table = match self.adapter.lock() {
            Ok(t) => t,
            Err(_) => return String::new(),
        };
        let Ok(f) = self.get_hook(&table, "extractModel") else {
            return String::new();
        };
        let Ok(ctx_lua) = self.context_to_lua(context) else {
            return String::new();
        };
        let result: mlua::Result<LuaValue> = f.call(ctx_lua);
        match result {
            Ok(LuaValue::String(s)) => s.to_string_lossy().to_string(),
            _ => String::new(),
        }
    }

    /// `validateKey(raw_key, group) -> {valid, error?}`. Exposed as async
    /// because the adapter may perform one or more `utils.httpRequest`
    /// calls; the blocking Lua/reqwest call is moved to a blocking thread so
    /// it never stalls the async executor (§9 resolved Open Question).
    pub async fn validate_key(self: &std::sync::Arc<Self>, raw_key: String, group: Group) -> ValidateKeyResult {
        let this = std::sync::Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.validate_key_blocking(&raw_key, &group)).await {
            Ok(result) => result,
            Err(e) => ValidateKeyResult::invalid(format!("validateKey task panicked: {e}")),
        }
    }

    fn validate_key_blocking(&self, raw_key: &str, group: &Group) -> ValidateKeyResult {
        let table = match self.adapter.lock() {
            Ok(t) => t,
            Err(_) => return ValidateKeyResult::invalid("adapter mutex poisoned"),
        };
        let f = match self.get_hook(&table, "validateKey") {
            Ok(f) => f,
            Err(e) => return ValidateKeyResult::invalid(e.to_string()),
        };
        let group_lua = match self.group_to_lua(group) {
            Ok(v) => v,
            Err(e) => return ValidateKeyResult::invalid(e.to_string()),
        };

        let result: mlua::Result<LuaValue> = f.call((raw_key.to_string(), group_lua));
        match result {
            Ok(v) => {
                let json = lua_to_json(v);
                match serde_json::from_value::<ValidateKeyResult>(json) {
                    Ok(result) => result,
                    Err(_) => ValidateKeyResult::invalid("validateKey returned a malformed result"),
                }
            }
            Err(e) => ValidateKeyResult::invalid(e.to_string()),
        }
    }
}
