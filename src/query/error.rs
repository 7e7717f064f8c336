//! Failure types on the question path.

use thiserror::Error;

/// How a single backend call failed. Decides whether the dispatcher retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network trouble, timeouts and 5xx responses.
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// The backend no longer accepts the session token.
    #[error("backend rejected the session token")]
    Unauthorized,

    /// The backend refused the request itself (quota, validation, policy).
    #[error("backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// What the UI layer receives when a question cannot be answered.
/// `Display` gives the text to show the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Please type a question first.")]
    EmptyQuestion,

    #[error("Your session has expired. Please sign in again.")]
    Unauthorized,

    #[error("Daily limit reached: {limit} questions per 24 hours.")]
    QuotaExceeded { limit: u32 },

    #[error("The assistant is temporarily unavailable ({0}). Please try again shortly.")]
    Unavailable(String),

    /// Backend-side refusal, passed through verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("The assistant is shutting down.")]
    ShuttingDown,
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;
