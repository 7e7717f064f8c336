#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use integrity_assistant::models::AssembledPrompt;
use integrity_assistant::query::{AuthProvider, BackendError, LanguageModel, SessionInfo};
use integrity_assistant::sensing::{OcrEngine, ScreenCapturer};
use integrity_assistant::{Assistant, AssistantConfig};

pub const SESSION: &str = "session-1";

/// A screen that is never available, so only keystrokes reach the store.
pub struct DarkScreen;

#[async_trait]
impl ScreenCapturer for DarkScreen {
    async fn capture(&self) -> Result<Vec<u8>> {
        Err(anyhow!("no display attached"))
    }
}

pub struct NoOcr;

#[async_trait]
impl OcrEngine for NoOcr {
    async fn extract_text(&self, _image: &[u8]) -> Result<String> {
        Err(anyhow!("ocr unavailable"))
    }
}

pub struct FakeAuth {
    info: Mutex<Option<SessionInfo>>,
    pub lookups: AtomicU32,
}

impl FakeAuth {
    pub fn signed_in() -> Arc<Self> {
        Self::with(Some(SessionInfo {
            authorized: true,
            quota_remaining: None,
            token: Some("token-1".into()),
        }))
    }

    /// `None` makes every lookup fail.
    pub fn with(info: Option<SessionInfo>) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(info),
            lookups: AtomicU32::new(0),
        })
    }

    pub fn set(&self, info: SessionInfo) {
        *self.info.lock().unwrap() = Some(info);
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn session_info(&self, _session_id: &str) -> Result<SessionInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.info
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("auth service down"))
    }
}

pub struct FakeModel {
    reply: Mutex<Result<String, BackendError>>,
    stall: Option<Duration>,
    pub prompts: Mutex<Vec<AssembledPrompt>>,
    pub calls: AtomicU32,
}

impl FakeModel {
    pub fn answering(text: &str) -> Arc<Self> {
        Self::build(Ok(text.to_string()), None)
    }

    pub fn failing(err: BackendError) -> Arc<Self> {
        Self::build(Err(err), None)
    }

    pub fn stalling(stall: Duration) -> Arc<Self> {
        Self::build(Ok("too late".into()), Some(stall))
    }

    fn build(reply: Result<String, BackendError>, stall: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            stall,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<AssembledPrompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, prompt: &AssembledPrompt, _session_token: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        self.reply.lock().unwrap().clone()
    }
}

/// Settings with fast capture ticks and near-instant retries.
pub fn test_config() -> AssistantConfig {
    let mut config = AssistantConfig::default();
    config.capture.screen_interval_ms = 20;
    config.capture.idle_check_ms = 10;
    config.capture.capture_retries = 0;
    config.backend.max_retries = 1;
    config.backend.backoff_base_ms = 1;
    config.backend.backoff_max_ms = 2;
    config.backend.request_timeout_secs = 5;
    config
}

pub fn assistant(config: AssistantConfig, auth: Arc<FakeAuth>, model: Arc<FakeModel>) -> Assistant {
    Assistant::new(config, Arc::new(DarkScreen), Arc::new(NoOcr), auth, model).unwrap()
}
