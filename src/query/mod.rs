//! The question path: authorization, quota, prompt assembly and dispatch.

pub mod assembler;
pub mod auth;
pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod rate_limiter;

pub use assembler::QueryAssembler;
pub use auth::{AuthProvider, RemoteAuth, SessionInfo, SessionRegistry};
pub use backend::{HttpBackend, LanguageModel, QuotaStatus};
pub use dispatcher::{AnswerDispatcher, RetryPolicy};
pub use error::{BackendError, QueryError, QueryResult};
pub use rate_limiter::{Admission, RateLimiter};
