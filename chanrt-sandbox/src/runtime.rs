//! §4.2 Sandboxed Runtime: an embedded Lua 5.4 VM with environment
//! stripping, a curated `utils`/`console` surface, and per-instance resource
//! counters. Owned by exactly one Adapter Instance (`chanrt-adapter`);
//! never shared across adapters or across requests from different adapters.

use crate::json_bridge::{json_to_lua, lua_to_json};
use crate::log_buffer::{truncate_message, LogLevel, LogRecord, LogRingBuffer};
use crate::rate_limit::SlidingWindowCounter;
use crate::url_gate::validate_url;
use chanrt_core::config::SandboxConfig;
use chanrt_core::context::{is_denylisted_header, is_valid_header_value};
use mlua::{HookTriggers, Lua, Table as LuaTable, Value as LuaValue, Variadic};
use std::io::Read;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USER_AGENT: &str = "GPT-Load-Script/1.0";

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}

struct Counters {
    http: SlidingWindowCounter,
    log: SlidingWindowCounter,
}

/// An embedded scripting VM owned by one Adapter Instance. Holds the `mlua`
/// state plus the mutable resource counters and the log ring buffer backing
/// `GET /scripts/:id/logs`.
pub struct SandboxRuntime {
    lua: Lua,
    script_name: String,
    counters: Arc<Mutex<Counters>>,
    log_buffer: Arc<Mutex<LogRingBuffer>>,
}

impl SandboxRuntime {
    pub fn new(script_name: impl Into<String>, config: &SandboxConfig) -> Result<Self, SandboxError> {
        let script_name = script_name.into();
        let lua = Lua::new();

        if config.max_memory_bytes > 0 {
            let _ = lua.set_memory_limit(config.max_memory_bytes);
        }

        strip_globals(&lua)?;
        install_call_depth_guard(&lua, config.max_call_depth)?;

        let counters = Arc::new(Mutex::new(Counters {
            http: SlidingWindowCounter::new(config.http_requests_per_minute),
            log: SlidingWindowCounter::new(config.log_lines_per_minute),
        }));
        let log_buffer = Arc::new(Mutex::new(LogRingBuffer::new(config.log_ring_capacity)));

        install_utils(
            &lua,
            &script_name,
            config,
            Arc::clone(&counters),
            Arc::clone(&log_buffer),
        )?;
        install_console(&lua, &script_name, Arc::clone(&counters), Arc::clone(&log_buffer))?;

        Ok(Self {
            lua,
            script_name,
            counters,
            log_buffer,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn recent_logs(&self) -> Vec<LogRecord> {
        self.log_buffer.lock().expect("log buffer mutex poisoned").snapshot()
    }

    pub fn http_request_count(&self) -> u32 {
        self.counters.lock().expect("counters mutex poisoned").http.current_count()
    }

    pub fn log_count(&self) -> u32 {
        self.counters.lock().expect("counters mutex poisoned").log.current_count()
    }
}

/// Before any user source executes: remove dynamic code loading, timers
/// (never installed, so nothing to strip), module imports, and host
/// environment access (§4.2 "Environment stripping").
fn strip_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ["load", "loadstring", "loadfile", "dofile", "require", "collectgarbage"] {
        globals.set(name, LuaValue::Nil)?;
    }
    for name in ["os", "io", "debug", "package"] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

/// §4.2 "Call stack cap": aborts execution once Lua call depth exceeds
/// `max_depth`, using a debug hook that fires on function call/return.
fn install_call_depth_guard(lua: &Lua, max_depth: u32) -> mlua::Result<()> {
    let depth = Arc::new(AtomicU32::new(0));
    let triggers = HookTriggers {
        on_calls: true,
        on_returns: true,
        ..Default::default()
    };
    lua.set_hook(triggers, move |_lua, debug| {
        match debug.event() {
            mlua::DebugEvent::Call | mlua::DebugEvent::TailCall => {
                let d = depth.fetch_add(1, Ordering::Relaxed) + 1;
                if d > max_depth {
                    return Err(mlua::Error::RuntimeError(format!(
                        "call stack depth exceeded maximum of {max_depth}"
                    )));
                }
            }
            mlua::DebugEvent::Ret => {
                depth.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
        Ok(mlua::VmState::Continue)
    })
}

#[allow(clippy::too_many_arguments)]
fn install_utils(
    lua: &Lua,
    script_name: &str,
    config: &SandboxConfig,
    counters: Arc<Mutex<Counters>>,
    log_buffer: Arc<Mutex<LogRingBuffer>>,
) -> mlua::Result<()> {
    let utils = lua.create_table()?;

    utils.set(
        "httpRequest",
        make_http_request_fn(lua, script_name, config, Arc::clone(&counters))?,
    )?;

    utils.set(
        "parseJSON",
        lua.create_function(|lua, s: String| -> mlua::Result<LuaValue> {
            match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(v) => json_to_lua(lua, &v),
                Err(_) => Ok(LuaValue::Nil),
            }
        })?,
    )?;

    utils.set(
        "base64Encode",
        lua.create_function(|_, s: String| -> mlua::Result<String> {
            if s.len() > 1024 * 1024 {
                return Err(mlua::Error::RuntimeError("input exceeds 1 MiB".to_string()));
            }
            use base64::Engine;
            Ok(base64::engine::general_purpose::STANDARD.encode(s.as_bytes()))
        })?,
    )?;

    utils.set(
        "base64Decode",
        lua.create_function(|_, s: String| -> mlua::Result<String> {
            if s.len() > 1024 * 1024 {
                return Err(mlua::Error::RuntimeError("input exceeds 1 MiB".to_string()));
            }
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map_err(|e| mlua::Error::RuntimeError(format!("invalid base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| mlua::Error::RuntimeError(format!("decoded bytes are not valid UTF-8: {e}")))
        })?,
    )?;

    utils.set(
        "parseURL",
        lua.create_function(|lua, s: String| -> mlua::Result<LuaValue> {
            match url::Url::parse(&s) {
                Ok(u) => {
                    let t = lua.create_table()?;
                    t.set("protocol", u.scheme())?;
                    t.set("host", u.host_str().unwrap_or(""))?;
                    t.set("pathname", u.path())?;
                    t.set("search", u.query().map(|q| format!("?{q}")).unwrap_or_default())?;
                    t.set("hash", u.fragment().map(|f| format!("#{f}")).unwrap_or_default())?;
                    Ok(LuaValue::Table(t))
                }
                Err(_) => Ok(LuaValue::Nil),
            }
        })?,
    )?;

    utils.set(
        "joinURL",
        lua.create_function(|_, (base, path): (String, String)| -> mlua::Result<String> {
            match url::Url::parse(&base).and_then(|b| b.join(&path)) {
                Ok(joined) => Ok(joined.to_string()),
                Err(_) => Ok(String::new()),
            }
        })?,
    )?;

    let log = lua.create_table()?;
    for (level_name, level) in [
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        let script_name = script_name.to_string();
        let counters = Arc::clone(&counters);
        let log_buffer = Arc::clone(&log_buffer);
        log.set(
            level_name,
            lua.create_function(move |_, message: String| -> mlua::Result<()> {
                emit_log(&script_name, level, &message, &counters, &log_buffer);
                Ok(())
            })?,
        )?;
    }
    utils.set("log", log)?;

    lua.globals().set("utils", utils)?;
    Ok(())
}

fn install_console(
    lua: &Lua,
    script_name: &str,
    counters: Arc<Mutex<Counters>>,
    log_buffer: Arc<Mutex<LogRingBuffer>>,
) -> mlua::Result<()> {
    let console = lua.create_table()?;
    for (fname, level) in [
        ("log", LogLevel::Info),
        ("error", LogLevel::Error),
        ("warn", LogLevel::Warn),
        ("debug", LogLevel::Debug),
    ] {
        let script_name = script_name.to_string();
        let counters = Arc::clone(&counters);
        let log_buffer = Arc::clone(&log_buffer);
        console.set(
            fname,
            lua.create_function(move |_, args: Variadic<LuaValue>| -> mlua::Result<()> {
                let message = args
                    .iter()
                    .map(lua_value_to_display)
                    .collect::<Vec<_>>()
                    .join(" ");
                emit_log(&script_name, level, &message, &counters, &log_buffer);
                Ok(())
            })?,
        )?;
    }
    lua.globals().set("console", console)?;
    Ok(())
}

fn lua_value_to_display(v: &LuaValue) -> String {
    match v {
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        other => lua_to_json(other.clone()).to_string(),
    }
}

/// §4.2 `utils.log`/`console`: rate-limited to 50/min, truncated at 1000
/// chars, emitted to the process log and retained in the ring buffer.
fn emit_log(
    script_name: &str,
    level: LogLevel,
    message: &str,
    counters: &Arc<Mutex<Counters>>,
    log_buffer: &Arc<Mutex<LogRingBuffer>>,
) {
    let allowed = counters.lock().expect("counters mutex poisoned").log.try_acquire();
    if !allowed {
        return;
    }
    let message = truncate_message(message);
    match level {
        LogLevel::Debug => tracing::debug!(script = script_name, script_type = "lua", %message, "adapter log"),
        LogLevel::Info => tracing::info!(script = script_name, script_type = "lua", %message, "adapter log"),
        LogLevel::Warn => tracing::warn!(script = script_name, script_type = "lua", %message, "adapter log"),
        LogLevel::Error => tracing::error!(script = script_name, script_type = "lua", %message, "adapter log"),
    }
    log_buffer.lock().expect("log buffer mutex poisoned").push(LogRecord {
        script: script_name.to_string(),
        script_type: "lua".to_string(),
        level,
        message,
        at: chrono::Utc::now(),
    });
}

fn make_http_request_fn(
    lua: &Lua,
    script_name: &str,
    config: &SandboxConfig,
    counters: Arc<Mutex<Counters>>,
) -> mlua::Result<mlua::Function> {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let total_timeout = Duration::from_millis(config.total_timeout_ms);
    let request_body_cap = config.outbound_request_body_cap;
    let response_body_cap = config.outbound_response_body_cap;
    let script_name = script_name.to_string();

    lua.create_function(move |lua, opts: LuaTable| -> mlua::Result<LuaValue> {
        if !counters.lock().expect("counters mutex poisoned").http.try_acquire() {
            return Err(mlua::Error::RuntimeError(
                "rate limit exceeded: too many outbound requests".to_string(),
            ));
        }

        let method: String = opts.get("method").unwrap_or_else(|_| "GET".to_string());
        let url: String = opts
            .get("url")
            .map_err(|_| mlua::Error::RuntimeError("httpRequest requires a url".to_string()))?;
        let headers: Option<LuaTable> = opts.get("headers").ok();
        let body: Option<String> = opts.get("body").ok();

        let parsed = validate_url(&url).map_err(mlua::Error::RuntimeError)?;

        if let Some(ref b) = body {
            if b.len() > request_body_cap {
                return Err(mlua::Error::RuntimeError(format!(
                    "request body exceeds {request_body_cap} bytes"
                )));
            }
        }

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .build()
            .map_err(|e| mlua::Error::RuntimeError(format!("failed to build http client: {e}")))?;

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| mlua::Error::RuntimeError(format!("invalid HTTP method: {method}")))?;
        let mut builder = client.request(method, parsed).header("User-Agent", USER_AGENT);

        if let Some(headers) = headers {
            for pair in headers.pairs::<String, String>() {
                let (name, value) = pair?;
                if is_denylisted_header(&name) {
                    continue;
                }
                if !is_valid_header_value(&value) {
                    return Err(mlua::Error::RuntimeError(format!(
                        "header '{name}' has an invalid value"
                    )));
                }
                builder = builder.header(name, value);
            }
        }

        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .map_err(|e| mlua::Error::RuntimeError(format!("{script_name}: http request failed: {e}")))?;

        let status_code = response.status().as_u16();
        let resp_headers_table = lua.create_table()?;
        for (name, value) in response.headers().iter() {
            let _ = resp_headers_table.set(name.as_str(), value.to_str().unwrap_or_default());
        }

        let mut body_bytes = Vec::new();
        let mut limited = response.take(response_body_cap as u64 + 1);
        limited
            .read_to_end(&mut body_bytes)
            .map_err(|e| mlua::Error::RuntimeError(format!("failed reading response body: {e}")))?;
        body_bytes.truncate(response_body_cap);
        let body_text = String::from_utf8_lossy(&body_bytes).to_string();

        let result = lua.create_table()?;
        result.set("status_code", status_code)?;
        result.set("headers", resp_headers_table)?;
        result.set("body", body_text)?;
        Ok(LuaValue::Table(result))
    })
}
