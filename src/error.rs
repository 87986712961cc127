//! Error taxonomy shared by the metrics and template components.
//!
//! Caller mistakes (bad input, unknown ids, missing variables, empty report
//! ranges) are kept apart from backend failures so that whatever sits in
//! front of this crate can map them to distinct responses.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, e.g. a template missing localized title or body.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A template or snapshot that had to exist does not.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Required template variables were not supplied at render time.
    #[error("Missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// A report was requested over a range holding no snapshots.
    #[error("No metrics data available for the requested range")]
    NoData,

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error was caused by the caller rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::NotFound(_) | Error::MissingVariables(_) | Error::NoData
        )
    }
}
