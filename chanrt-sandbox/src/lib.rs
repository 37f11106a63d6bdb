//! §4.2 Sandboxed Runtime and its supporting URL gate, rate limiter, and
//! adapter log ring buffer.

pub mod json_bridge;
pub mod log_buffer;
pub mod rate_limit;
pub mod runtime;
pub mod url_gate;

pub use log_buffer::{LogLevel, LogRecord, LogRingBuffer};
pub use runtime::{SandboxError, SandboxRuntime};
pub use url_gate::validate_url;
