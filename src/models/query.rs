use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user question, alive from submission until dispatch returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub id: Uuid,
    pub session_id: String,
    pub question: String,
    pub asked_at: DateTime<Utc>,
}

impl QueryRequest {
    pub fn new(session_id: impl Into<String>, question: impl Into<String>, asked_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            question: question.into(),
            asked_at,
        }
    }
}

/// The payload handed to the language-model backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssembledPrompt {
    pub request_id: Uuid,
    pub question: String,
    pub context_excerpt: String,
    pub asked_at: DateTime<Utc>,
    /// How many fragments went into `context_excerpt`.
    pub fragments_used: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub request_id: Uuid,
    pub text: String,
    pub asked_at: DateTime<Utc>,
    pub answered_at: DateTime<Utc>,
    pub fragments_used: usize,
    /// Queries left in the session's rolling 24h window after this one.
    pub remaining_quota: u32,
}
