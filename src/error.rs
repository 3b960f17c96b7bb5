use thiserror::Error;

pub type Result<T> = std::result::Result<T, JournalError>;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JournalError {
    /// Stable identifier sent to the UI alongside the message
    pub fn kind(&self) -> &'static str {
        match self {
            JournalError::Validation(_) => "validation",
            JournalError::InvalidInput(_) => "invalid_input",
            JournalError::StoreUnavailable(_) => "store_unavailable",
            JournalError::NotFound(_) => "not_found",
            JournalError::Migration(_) => "migration",
            JournalError::Config(_) => "config",
        }
    }
}

impl From<rusqlite::Error> for JournalError {
    fn from(err: rusqlite::Error) -> Self {
        JournalError::StoreUnavailable(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for JournalError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        JournalError::StoreUnavailable(format!("connection lock poisoned: {}", err))
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::Validation(err.to_string())
    }
}
