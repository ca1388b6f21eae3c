use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatboxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatboxError {
    /// Short error code string included in non-streaming JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ChatboxError::Config(_) => "CONFIG_ERROR",
            ChatboxError::Serialization(_) => "SERIALIZATION_ERROR",
            ChatboxError::Io(_) => "IO_ERROR",
            ChatboxError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatboxError>;
