//! Session authorization lookups.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::backend::HttpBackend;
use super::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub authorized: bool,
    /// Server-side count of questions left today, when the provider knows it.
    pub quota_remaining: Option<u32>,
    /// Bearer token for the language-model backend.
    pub token: Option<String>,
}

impl SessionInfo {
    pub fn unauthorized() -> Self {
        Self {
            authorized: false,
            quota_remaining: None,
            token: None,
        }
    }
}

/// Answers whether a session may ask questions. An `Err` means the lookup
/// itself failed, not that the session was refused.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn session_info(&self, session_id: &str) -> Result<SessionInfo>;
}

struct SessionEntry {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Signed-in sessions, held in memory only.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionEntry>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a token for the session. `ttl` of `None` never expires.
    pub fn sign_in(&self, session_id: &str, token: impl Into<String>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        self.write().insert(
            session_id.to_string(),
            SessionEntry {
                token: token.into(),
                expires_at,
            },
        );
        info!("session {session_id} signed in");
    }

    pub fn sign_out(&self, session_id: &str) -> bool {
        let removed = self.write().remove(session_id).is_some();
        if removed {
            info!("session {session_id} signed out");
        }
        removed
    }

    /// The session's token if it is signed in and not expired.
    pub fn token(&self, session_id: &str) -> Option<String> {
        self.token_at(session_id, Utc::now())
    }

    pub fn token_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<String> {
        let sessions = self.read();
        let entry = sessions.get(session_id)?;
        match entry.expires_at {
            Some(expires_at) if expires_at <= now => None,
            _ => Some(entry.token.clone()),
        }
    }
}

#[async_trait]
impl AuthProvider for SessionRegistry {
    async fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        Ok(match self.token(session_id) {
            Some(token) => SessionInfo {
                authorized: true,
                quota_remaining: None,
                token: Some(token),
            },
            None => SessionInfo::unauthorized(),
        })
    }
}

/// Checks local sign-in, then asks the backend for the session's quota.
pub struct RemoteAuth {
    registry: Arc<SessionRegistry>,
    backend: Arc<HttpBackend>,
}

impl RemoteAuth {
    pub fn new(registry: Arc<SessionRegistry>, backend: Arc<HttpBackend>) -> Self {
        Self { registry, backend }
    }
}

#[async_trait]
impl AuthProvider for RemoteAuth {
    async fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        let Some(token) = self.registry.token(session_id) else {
            return Ok(SessionInfo::unauthorized());
        };

        match self.backend.fetch_quota(&token).await {
            Ok(quota) => Ok(SessionInfo {
                authorized: true,
                quota_remaining: Some(quota.remaining),
                token: Some(token),
            }),
            Err(BackendError::Unauthorized) => Ok(SessionInfo::unauthorized()),
            Err(err) => Err(anyhow!("quota lookup failed: {err}")),
        }
    }
}
