//! Error types for the colloquy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level `Error`
//! aggregates them for the public surface.

use thiserror::Error;

/// The top-level error type for all colloquy operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller supplied an invalid argument or configuration.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Serialization ---
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification, used by the diagnostics layer and the
/// error callback. Every `Error` variant projects onto exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParam,
    OutOfMemory,
    ModelNotFound,
    BackendInit,
    Inference,
    ToolNotFound,
    JsonParse,
    Http,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidParam => "invalid_param",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::BackendInit => "backend_init",
            ErrorKind::Inference => "inference",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::JsonParse => "json_parse",
            ErrorKind::Http => "http",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Project this error onto its diagnostic kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParam(_) => ErrorKind::InvalidParam,
            Error::Backend(e) => e.kind(),
            Error::Tool(e) => e.kind(),
            Error::Json(_) => ErrorKind::JsonParse,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Backend initialization failed: {0}")]
    Init(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("HTTP request failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            BackendError::Init(_) => ErrorKind::BackendInit,
            BackendError::Inference(_) => ErrorKind::Inference,
            BackendError::Http { .. } => ErrorKind::Http,
            BackendError::OutOfMemory(_) => ErrorKind::OutOfMemory,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::ToolNotFound,
            ToolError::ExecutionFailed { .. } => ErrorKind::Inference,
            ToolError::InvalidArguments(_) => ErrorKind::InvalidParam,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_status() {
        let err = Error::Backend(BackendError::Http {
            status: Some(429),
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert_eq!(err.kind(), ErrorKind::Http);
    }

    #[test]
    fn http_error_without_status() {
        let err = BackendError::Http {
            status: None,
            message: "connection refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("connection refused"));
        assert!(!text.contains("status"));
    }

    #[test]
    fn model_not_found_kind() {
        let err = Error::Backend(BackendError::ModelNotFound(
            "Model file not found: /tmp/missing.gguf".into(),
        ));
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn tool_error_kinds() {
        assert_eq!(
            ToolError::NotFound("todo".into()).kind(),
            ErrorKind::ToolNotFound
        );
        assert_eq!(
            ToolError::InvalidArguments("missing id".into()).kind(),
            ErrorKind::InvalidParam
        );
    }

    #[test]
    fn json_errors_map_to_json_parse() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = Error::from(parse_err);
        assert_eq!(err.kind(), ErrorKind::JsonParse);
    }
}
