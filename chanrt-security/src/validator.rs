//! §4.1 Security Validator — the gate every adapter passes before it is
//! compiled into a live Adapter Instance, and on every `disabled -> enabled`
//! transition.
//!
//! The validator is stateless and deterministic: it owns no state between
//! calls and validating the same source twice returns the same
//! [`ValidationOutcome`].

use crate::patterns;
use chanrt_core::catalogue::AdapterMetadata;
use mlua::{Lua, Value as LuaValue};
use serde::{Deserialize, Serialize};

/// Hard caps enforced by step 1 and step 3. Mirrors
/// `chanrt_core::config::ValidatorConfig` so callers can thread the runtime
/// configuration through without this crate depending on figment.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorLimits {
    pub max_source_bytes: usize,
    pub max_lines: usize,
    pub max_nesting: usize,
    pub max_functions: usize,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 1024 * 1024,
            max_lines: 10_000,
            max_nesting: 20,
            max_functions: 100,
        }
    }
}

/// A source that has passed every check, together with the metadata it
/// declared. Produced only by [`validate`].
#[derive(Debug, Clone)]
pub struct ValidatedAdapter {
    pub metadata: AdapterMetadata,
}

/// Rejection reason, surfaced verbatim to admin clients (never to proxy
/// clients, per §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationOutcome = Result<ValidatedAdapter, ValidationError>;

/// Run the full §4.1 gate against `source`, with the caller-supplied
/// metadata `declared` (as posted to `/scripts` or `/scripts/validate`) used
/// only to cross-check the metadata the script itself returns at runtime.
pub fn validate(source: &str, limits: &ValidatorLimits) -> ValidationOutcome {
    check_size(source, limits)?;
    if let Some(reason) = patterns::first_match(source) {
        return Err(ValidationError(format!("forbidden pattern: {reason}")));
    }
    check_complexity(source, limits)?;
    let metadata = execute_and_check_contract(source)?;
    Ok(ValidatedAdapter { metadata })
}

fn check_size(source: &str, limits: &ValidatorLimits) -> Result<(), ValidationError> {
    if source.len() > limits.max_source_bytes {
        return Err(ValidationError(format!(
            "source exceeds maximum size of {} bytes",
            limits.max_source_bytes
        )));
    }
    Ok(())
}

fn check_complexity(source: &str, limits: &ValidatorLimits) -> Result<(), ValidationError> {
    let line_count = source.lines().count();
    if line_count > limits.max_lines {
        return Err(ValidationError(format!(
            "source exceeds maximum line count of {}",
            limits.max_lines
        )));
    }

    let mut depth: i64 = 0;
    let mut max_depth: i64 = 0;
    for tok in tokenize_nesting(source) {
        match tok {
            NestingToken::Open => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            NestingToken::Close => depth = (depth - 1).max(0),
        }
    }
    if max_depth as usize > limits.max_nesting {
        return Err(ValidationError(format!(
            "source exceeds maximum nesting depth of {}",
            limits.max_nesting
        )));
    }

    let function_count = count_function_defs(source);
    if function_count > limits.max_functions {
        return Err(ValidationError(format!(
            "source exceeds maximum function count of {}",
            limits.max_functions
        )));
    }

    Ok(())
}

enum NestingToken {
    Open,
    Close,
}

/// Approximates Lua block nesting by counting block-opening keywords against
/// their `end` closers, skipping string and comment content. Lua has no
/// braces; `function`, `if`, `for`, `while`, `do`, `repeat` open a block and
/// `end` (or `until` for `repeat`) closes one.
fn tokenize_nesting(source: &str) -> Vec<NestingToken> {
    let mut tokens = Vec::new();
    for word in iter_lua_words(source) {
        match word {
            "function" | "if" | "for" | "while" | "do" => tokens.push(NestingToken::Open),
            "end" => tokens.push(NestingToken::Close),
            "until" => tokens.push(NestingToken::Close),
            "repeat" => tokens.push(NestingToken::Open),
            _ => {}
        }
    }
    tokens
}

fn count_function_defs(source: &str) -> usize {
    iter_lua_words(source)
        .filter(|w| *w == "function")
        .count()
}

/// Yields whitespace/punctuation-delimited words from `source`, skipping the
/// contents of `"..."`, `'...'`, and `--` line comments so keywords inside
/// strings or comments are not mistaken for real structure. Not a full Lua
/// lexer — sufficient for a conservative complexity estimate.
fn iter_lua_words(source: &str) -> impl Iterator<Item = &str> {
    let mut words = Vec::new();
    let mut word_start: Option<usize> = None;
    let bytes = source.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '-' && i + 1 < bytes.len() && bytes[i + 1] as char == '-' {
            if let Some(s) = word_start.take() {
                words.push(&source[s..i]);
            }
            if let Some(rest) = source[i..].find('\n') {
                i += rest + 1;
            } else {
                break;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            if let Some(s) = word_start.take() {
                words.push(&source[s..i]);
            }
            let quote = c;
            i += 1;
            while i < bytes.len() && bytes[i] as char != quote {
                if bytes[i] as char == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            if word_start.is_none() {
                word_start = Some(i);
            }
        } else if let Some(s) = word_start.take() {
            words.push(&source[s..i]);
        }
        i += 1;
    }
    if let Some(s) = word_start {
        words.push(&source[s..]);
    }
    words.into_iter()
}

/// Step 4 and step 5: parse and execute the source once in a throwaway
/// sandbox, then enforce the structural contract of §3/§4.1.5 against the
/// object `exports()` returns.
fn execute_and_check_contract(source: &str) -> Result<AdapterMetadata, ValidationError> {
    let lua = Lua::new();
    strip_globals(&lua).map_err(|e| ValidationError(format!("sandbox setup error: {e}")))?;
    install_stub_surface(&lua).map_err(|e| ValidationError(format!("sandbox setup error: {e}")))?;

    lua.load(source)
        .set_name("adapter")
        .exec()
        .map_err(|e| ValidationError(format!("script error: {e}")))?;

    let exports_value: LuaValue = lua
        .globals()
        .get("exports")
        .map_err(|e| ValidationError(format!("script error: {e}")))?;

    let exports_fn = match exports_value {
        LuaValue::Function(f) => f,
        _ => {
            return Err(ValidationError(
                "script must define a global `exports` function".to_string(),
            ))
        }
    };

    let adapter_table: LuaValue = exports_fn
        .call(())
        .map_err(|e| ValidationError(format!("exports() raised an error: {e}")))?;

    let table = match adapter_table {
        LuaValue::Table(t) => t,
        _ => {
            return Err(ValidationError(
                "exports() must return a table".to_string(),
            ))
        }
    };

    for hook in [
        "buildUpstreamURL",
        "modifyRequest",
        "isStreamRequest",
        "extractModel",
        "validateKey",
    ] {
        match table.get::<LuaValue>(hook) {
            Ok(LuaValue::Function(_)) => {}
            _ => {
                return Err(ValidationError(format!(
                    "exports() result is missing required hook `{hook}`"
                )))
            }
        }
    }

    let metadata_value: LuaValue = table
        .get("metadata")
        .map_err(|e| ValidationError(format!("exports() result has no readable `metadata`: {e}")))?;
    let metadata_table = match metadata_value {
        LuaValue::Table(t) => t,
        _ => {
            return Err(ValidationError(
                "exports() result's `metadata` must be a table".to_string(),
            ))
        }
    };

    read_metadata(&lua, &metadata_table)
}

fn read_metadata(lua: &Lua, t: &mlua::Table) -> Result<AdapterMetadata, ValidationError> {
    let required = |field: &str| -> Result<String, ValidationError> {
        t.get::<String>(field)
            .map_err(|_| ValidationError(format!("metadata.{field} is required and must be a string")))
    };

    let name = required("name")?;
    let version = required("version")?;
    let description = required("description")?;
    let author = required("author")?;
    let channel_type = required("channel_type")?;
    if channel_type.trim().is_empty() {
        return Err(ValidationError(
            "metadata.channel_type must not be empty".to_string(),
        ));
    }

    let supported_models = lua_string_array(lua, t, "supported_models").unwrap_or_default();
    let required_config = lua_string_array(lua, t, "required_config").unwrap_or_default();
    let default_test_model = t.get::<Option<String>>("default_test_model").unwrap_or(None);
    let default_validation_endpoint = t
        .get::<Option<String>>("default_validation_endpoint")
        .unwrap_or(None);

    Ok(AdapterMetadata {
        name,
        version,
        description,
        author,
        channel_type,
        supported_models,
        default_test_model,
        default_validation_endpoint,
        required_config,
    })
}

fn lua_string_array(_lua: &Lua, t: &mlua::Table, field: &str) -> Option<Vec<String>> {
    let arr: mlua::Table = t.get(field).ok()?;
    let len = arr.raw_len();
    let mut out = Vec::with_capacity(len);
    for i in 1..=len {
        out.push(arr.get::<String>(i).ok()?);
    }
    Some(out)
}

/// Environment stripping shared in spirit with `chanrt_sandbox::runtime`, but
/// intentionally independent: the validator must not depend on the live
/// runtime crate (it sits below it in the dependency order of §2).
fn strip_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ["load", "loadstring", "loadfile", "dofile", "require"] {
        globals.set(name, LuaValue::Nil)?;
    }
    for name in ["os", "io", "debug", "package"] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

/// A no-op `utils`/`console` surface so a script referencing them at the top
/// level (before the real sandbox ever sees it) still parses and executes.
fn install_stub_surface(lua: &Lua) -> mlua::Result<()> {
    let noop = lua.create_function(|_, _: mlua::Variadic<LuaValue>| Ok(()))?;

    let log = lua.create_table()?;
    for level in ["debug", "info", "warn", "error"] {
        log.set(level, noop.clone())?;
    }
    let utils = lua.create_table()?;
    utils.set("log", log)?;
    utils.set(
        "httpRequest",
        lua.create_function(|_, _: LuaValue| -> mlua::Result<LuaValue> {
            Err(mlua::Error::RuntimeError(
                "utils.httpRequest is unavailable during validation".to_string(),
            ))
        })?,
    )?;
    utils.set(
        "parseJSON",
        lua.create_function(|_, _: String| -> mlua::Result<LuaValue> { Ok(LuaValue::Nil) })?,
    )?;
    utils.set("base64Encode", noop.clone())?;
    utils.set("base64Decode", noop.clone())?;
    utils.set(
        "parseURL",
        lua.create_function(|_, _: String| -> mlua::Result<LuaValue> { Ok(LuaValue::Nil) })?,
    )?;
    utils.set(
        "joinURL",
        lua.create_function(|_, _: (String, String)| -> mlua::Result<String> { Ok(String::new()) })?,
    )?;
    lua.globals().set("utils", utils)?;

    let console = lua.create_table()?;
    for fname in ["log", "error", "warn", "debug"] {
        console.set(fname, noop.clone())?;
    }
    lua.globals().set("console", console)?;
    Ok(())
}
