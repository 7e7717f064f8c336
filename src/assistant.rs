use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::models::{Answer, QueryRequest};
use crate::query::{
    AnswerDispatcher, AuthProvider, HttpBackend, LanguageModel, QueryAssembler, QueryError, QueryResult,
    RateLimiter, RemoteAuth, SessionRegistry,
};
use crate::sensing::{CaptureController, CaptureHealth, KeystrokeTap, OcrEngine, ScreenCapturer};
use crate::settings::AssistantConfig;

/// Entry point for the UI layer: owns the capture loops, the context window
/// and the question path.
pub struct Assistant {
    store: ContextStore,
    limiter: RateLimiter,
    assembler: QueryAssembler,
    auth: Arc<dyn AuthProvider>,
    dispatcher: AnswerDispatcher,
    capture: Mutex<CaptureController>,
    shutdown: CancellationToken,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        capturer: Arc<dyn ScreenCapturer>,
        ocr: Arc<dyn OcrEngine>,
        auth: Arc<dyn AuthProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        config.validate().context("invalid assistant settings")?;

        let shutdown = CancellationToken::new();
        let store = ContextStore::new(&config.context);
        let capture = CaptureController::new(
            capturer,
            ocr,
            store.clone(),
            config.capture.clone(),
            config.redaction.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            limiter: RateLimiter::new(config.query.daily_limit),
            assembler: QueryAssembler::new(config.query.excerpt_budget_chars),
            dispatcher: AnswerDispatcher::from_config(model, &config.backend),
            auth,
            store,
            capture: Mutex::new(capture),
            shutdown,
        })
    }

    /// Wire the hosted backend: answers over HTTP, sessions from `registry`
    /// with the server's quota.
    pub fn with_http_backend(
        config: AssistantConfig,
        capturer: Arc<dyn ScreenCapturer>,
        ocr: Arc<dyn OcrEngine>,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        let auth = Arc::new(RemoteAuth::new(registry, Arc::clone(&backend)));
        Self::new(config, capturer, ocr, auth, backend)
    }

    pub fn context(&self) -> &ContextStore {
        &self.store
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn activate_overlay(&self) {
        info!("overlay activated");
    }

    pub async fn keystroke_tap(&self) -> KeystrokeTap {
        self.capture.lock().await.tap()
    }

    pub async fn start_capture(&self) -> Result<()> {
        self.capture.lock().await.start()
    }

    pub async fn stop_capture(&self) -> Result<()> {
        self.capture.lock().await.stop().await
    }

    pub async fn set_capture_paused(&self, paused: bool) {
        self.capture.lock().await.set_paused(paused);
    }

    pub async fn capture_health(&self) -> CaptureHealth {
        self.capture.lock().await.health()
    }

    /// Answer `question` for `session_id` using the current context window.
    ///
    /// Checks run in order: authorization, the server-reported quota, the
    /// local rolling quota. Only an admitted question reaches the backend,
    /// and an admitted question counts against the quota even if dispatch
    /// then fails.
    pub async fn submit_question(&self, session_id: &str, question: &str) -> QueryResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        if self.shutdown.is_cancelled() {
            return Err(QueryError::ShuttingDown);
        }

        let request = QueryRequest::new(session_id, question, Utc::now());

        let session = match self.auth.session_info(session_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!("request {}: session lookup failed: {err:#}", request.id);
                return Err(QueryError::Unavailable("could not verify your session".into()));
            }
        };
        if !session.authorized {
            return Err(QueryError::Unauthorized);
        }
        let Some(token) = session.token else {
            return Err(QueryError::Unauthorized);
        };

        let limit = self.limiter.daily_limit();
        if session.quota_remaining == Some(0) {
            info!("request {}: server reports no quota left", request.id);
            return Err(QueryError::QuotaExceeded { limit });
        }
        let admission = self.limiter.admit_at(session_id, request.asked_at);
        if !admission.allowed {
            info!("request {}: daily limit of {limit} reached", request.id);
            return Err(QueryError::QuotaExceeded { limit });
        }

        let snapshot = self.store.snapshot_at(request.asked_at);
        let prompt = self.assembler.assemble(&request, &snapshot);
        info!(
            "request {} admitted ({} of {} fragments, {} questions left)",
            request.id,
            prompt.fragments_used,
            snapshot.len(),
            admission.remaining
        );

        let text = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!("request {} abandoned on shutdown", request.id);
                return Err(QueryError::ShuttingDown);
            }
            result = self.dispatcher.dispatch(&prompt, &token) => result?,
        };

        let remaining_quota = match session.quota_remaining {
            Some(server) => server.saturating_sub(1).min(admission.remaining),
            None => admission.remaining,
        };

        Ok(Answer {
            request_id: request.id,
            text,
            asked_at: request.asked_at,
            answered_at: Utc::now(),
            fragments_used: prompt.fragments_used,
            remaining_quota,
        })
    }

    /// Stop capture, abandon in-flight questions and drop all context.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let stopped = self.stop_capture().await;
        self.store.clear();
        info!("assistant shut down");
        stopped
    }
}
