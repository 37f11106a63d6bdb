//! Fixed textual denylist enforced before an adapter script is ever parsed.
//!
//! The categories mirror the reference sandbox's denylist (dynamic code
//! construction, timers, host access, ...) translated onto the surface of the
//! embedded Lua 5.4 dialect chosen in DESIGN.md. Patterns are matched
//! textually — no parsing happens until a script has already cleared this
//! gate.

use once_cell::sync::Lazy;
use regex::RegexSet;

/// One denylisted pattern, with a human-readable reason surfaced verbatim to
/// the catalogue API on rejection.
struct ForbiddenPattern {
    regex: &'static str,
    reason: &'static str,
}

const FORBIDDEN: &[ForbiddenPattern] = &[
    // Dynamic code construction
    ForbiddenPattern { regex: r"\bload\s*\(", reason: "dynamic code loading via load() is not allowed" },
    ForbiddenPattern { regex: r"\bloadstring\s*\(", reason: "dynamic code loading via loadstring() is not allowed" },
    ForbiddenPattern { regex: r"\bloadfile\s*\(", reason: "dynamic code loading via loadfile() is not allowed" },
    ForbiddenPattern { regex: r"\bdofile\s*\(", reason: "dynamic code loading via dofile() is not allowed" },
    // Module / file imports
    ForbiddenPattern { regex: r"\brequire\s*\(", reason: "module imports via require() are not allowed" },
    // Host environment / platform access
    ForbiddenPattern { regex: r"\bos\.", reason: "access to the os library is not allowed" },
    ForbiddenPattern { regex: r"\bio\.", reason: "access to the io library is not allowed" },
    ForbiddenPattern { regex: r"\bdebug\.", reason: "access to the debug library is not allowed" },
    ForbiddenPattern { regex: r"\bpackage\.", reason: "access to the package library is not allowed" },
    // Transports the sandbox does not broker
    ForbiddenPattern { regex: r"\bsocket\.", reason: "raw socket access is not allowed; use utils.httpRequest" },
    ForbiddenPattern { regex: r"\bnet\.", reason: "raw networking access is not allowed; use utils.httpRequest" },
    // Introspection escape hatches
    ForbiddenPattern { regex: r"\bgetmetatable\s*\(", reason: "metatable introspection is not allowed" },
    ForbiddenPattern { regex: r"\bsetmetatable\s*\(", reason: "metatable manipulation is not allowed" },
    ForbiddenPattern { regex: r"\brawget\s*\(", reason: "raw table access is not allowed" },
    ForbiddenPattern { regex: r"\brawset\s*\(", reason: "raw table access is not allowed" },
    ForbiddenPattern { regex: r"\brawequal\s*\(", reason: "raw table access is not allowed" },
    // Obvious denial-of-service shapes
    ForbiddenPattern { regex: r"\bwhile\s+true\s+do\b", reason: "unconditional infinite loops are not allowed" },
    ForbiddenPattern { regex: r"\bwhile\s*\(\s*true\s*\)\s*do\b", reason: "unconditional infinite loops are not allowed" },
    // Obfuscation / encoding primitives common in payloads
    ForbiddenPattern { regex: r"(?:string\.char\s*\([^)]*,){8,}", reason: "long string.char() chains are not allowed" },
    ForbiddenPattern { regex: r"\bcollectgarbage\s*\(\s*[\"']count[\"']\s*\)", reason: "garbage collector introspection is not allowed" },
];

static FORBIDDEN_SET: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(FORBIDDEN.iter().map(|p| p.regex)).expect("forbidden pattern set must compile"));

/// Returns the reason for the first forbidden pattern that matches `source`,
/// or `None` if none match. Deterministic: lowest pattern index wins when
/// several match, so repeated calls against the same source always surface
/// the same reason.
pub fn first_match(source: &str) -> Option<&'static str> {
    let matches = FORBIDDEN_SET.matches(source);
    matches
        .into_iter()
        .min()
        .map(|idx| FORBIDDEN[idx].reason)
}
