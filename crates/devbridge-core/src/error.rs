use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No offset configuration matches architecture {arch}")]
    UnresolvedConfig { arch: String },

    #[error("Config is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid offset for {field}: {message}")]
    InvalidOffset { field: &'static str, message: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Script template error: {0}")]
    ScriptTemplate(String),

    #[error("No target processes found: {0}")]
    NoTargets(String),

    #[error("Process lookup failed: {0}")]
    ProcessLookup(String),

    #[error("Failed to attach to any of {0} target processes")]
    NoAttachableTargets(usize),

    #[error("Failed to attach to PID {pid}: {message}")]
    Attach { pid: u32, message: String },

    #[error("Failed to load script into PID {pid}: {message}")]
    ScriptLoad { pid: u32, message: String },

    #[error("Failed to unload script from PID {pid}: {message}")]
    ScriptUnload { pid: u32, message: String },

    #[error("Failed to detach from PID {pid}: {message}")]
    Detach { pid: u32, message: String },

    #[error("Controller cannot start while {0}")]
    NotIdle(String),

    #[error("{step} timed out after {}s", .timeout.as_secs_f32())]
    Timeout { step: String, timeout: Duration },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] async_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Startup errors that come from the offset configuration rather than the
    /// environment.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedConfig { .. }
                | Error::MissingFields(_)
                | Error::InvalidOffset { .. }
                | Error::InvalidConfig(_)
                | Error::ScriptTemplate(_)
                | Error::Json(_)
        )
    }
}
