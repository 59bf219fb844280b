use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-visible error classification carried in every failed tool response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    UnknownTool,
    NavigationError,
    ElementNotFoundError,
    ScriptError,
    #[serde(rename = "IOError")]
    IoError,
    TimeoutError,
    StateError,
    ShutdownError,
    EngineFatalError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::UnknownTool => "UnknownTool",
            Self::NavigationError => "NavigationError",
            Self::ElementNotFoundError => "ElementNotFoundError",
            Self::ScriptError => "ScriptError",
            Self::IoError => "IOError",
            Self::TimeoutError => "TimeoutError",
            Self::StateError => "StateError",
            Self::ShutdownError => "ShutdownError",
            Self::EngineFatalError => "EngineFatalError",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Shutting down: {0}")]
    Shutdown(String),

    #[error("Browser engine lost: {0}")]
    EngineFatal(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::Navigation(_) => ErrorKind::NavigationError,
            Self::ElementNotFound(_) => ErrorKind::ElementNotFoundError,
            Self::Script(_) => ErrorKind::ScriptError,
            Self::Io(_) => ErrorKind::IoError,
            Self::Timeout(_) => ErrorKind::TimeoutError,
            Self::State(_) => ErrorKind::StateError,
            Self::Shutdown(_) => ErrorKind::ShutdownError,
            Self::EngineFatal(_) => ErrorKind::EngineFatalError,
            Self::Config(_) | Self::Json(_) | Self::Transport(_) | Self::Other(_) => {
                ErrorKind::InternalError
            }
        }
    }

    /// Whether the session that produced this error can serve further calls.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EngineFatal(_) | Self::Shutdown(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
