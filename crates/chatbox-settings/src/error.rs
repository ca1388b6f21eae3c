use thiserror::Error;

/// Errors that can occur during settings operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A patch value is outside its allowed range.
    #[error("invalid settings value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
