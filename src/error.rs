//! Error taxonomy shared across the ingestion and answer pipelines.
//!
//! Four kinds cover every failure the core can produce. Callers above the
//! core (CLI, HTTP) translate the kind into exit codes or status codes;
//! the core's contract is kind + condition, nothing transport-specific.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A job, conversation, or source file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected input: unsupported file type, out-of-range grade, a claim
    /// on a job that is not PENDING.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The embedding or generation capability is unreachable or returned
    /// an error after retries.
    #[error("external service failure: {0}")]
    ExternalService(String),

    /// A store read or write failed.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
