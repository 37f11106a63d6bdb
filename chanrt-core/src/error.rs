use thiserror::Error;

/// Unified error type for the channel runtime.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("hook error: {hook} failed: {message}")]
    Hook { hook: String, message: String },

    #[error("sandbox I/O error: {0}")]
    SandboxIo(String),

    #[error("catalogue entry not found: {0}")]
    NotFound(String),

    #[error("catalogue constraint violated: {0}")]
    Constraint(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("channel type not registered: {0}")]
    ChannelTypeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChannelError {
    /// Map to an HTTP status code for the admin API.
    pub fn status_code(&self) -> u16 {
        match self {
            ChannelError::Validation(_) => 400,
            ChannelError::Compile(_) => 400,
            ChannelError::NotFound(_) => 404,
            ChannelError::ChannelTypeNotFound(_) => 404,
            ChannelError::Constraint(_) => 409,
            ChannelError::Unauthorized => 401,
            ChannelError::RateLimited => 429,
            ChannelError::Hook { .. } => 502,
            ChannelError::SandboxIo(_) => 502,
            _ => 500,
        }
    }

    /// Stable machine-readable error code used in the admin API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::Validation(_) => "validation_error",
            ChannelError::Compile(_) => "compile_error",
            ChannelError::Hook { .. } => "hook_error",
            ChannelError::SandboxIo(_) => "sandbox_io_error",
            ChannelError::NotFound(_) => "not_found",
            ChannelError::Constraint(_) => "constraint_violation",
            ChannelError::Unauthorized => "unauthorized",
            ChannelError::RateLimited => "rate_limited",
            ChannelError::ChannelTypeNotFound(_) => "channel_type_not_found",
            ChannelError::Io(_) => "io_error",
            ChannelError::Serde(_) => "serde_error",
            ChannelError::Internal(_) => "internal_error",
        }
    }

    /// JSON error body for the admin API envelope: `{"success":false,"error":{code,message}}`.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
        .to_string()
        .into_bytes()
    }
}
