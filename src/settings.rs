use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

pub const API_URL_ENV: &str = "INTEGRITY_API_URL";
pub const DAILY_LIMIT_ENV: &str = "INTEGRITY_DAILY_LIMIT";

const DEFAULT_API_URL: &str = "https://integrity-api.railway.app";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub screen_interval_ms: u64,
    /// Upper bound for one capture or OCR attempt.
    pub ocr_timeout_ms: u64,
    /// Extra attempts per tick after a failed capture/OCR.
    pub capture_retries: u32,
    /// Consecutive failed ticks before capture health turns degraded.
    pub degraded_after: u32,
    pub phash_change_threshold: u32,
    /// Re-run OCR on an unchanged frame after this long.
    pub ocr_refresh_secs: u64,
    pub keystroke_queue: usize,
    pub idle_check_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            screen_interval_ms: 500,
            ocr_timeout_ms: 3_000,
            capture_retries: 1,
            degraded_after: 10,
            phash_change_threshold: 8,
            ocr_refresh_secs: 30,
            keystroke_queue: 1_024,
            idle_check_ms: 250,
        }
    }
}

impl CaptureConfig {
    pub fn screen_interval(&self) -> Duration {
        Duration::from_millis(self.screen_interval_ms)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }

    pub fn ocr_refresh(&self) -> Duration {
        Duration::from_secs(self.ocr_refresh_secs)
    }

    pub fn idle_check(&self) -> Duration {
        Duration::from_millis(self.idle_check_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedactionConfig {
    pub max_buffered_keystrokes: usize,
    pub idle_flush_ms: u64,
    /// Digits in a row before the field turns suspect.
    pub suspect_digit_run: usize,
    /// Held suspect text longer than this is discarded instead of released.
    pub max_held_chars: usize,
    /// Words that mark the value typed after them as secret, whether it
    /// follows `:`, `=` or just a space.
    pub keywords: Vec<String>,
    /// Short-code words (`cvv 123`) that mark a following number as secret
    /// even without `:` or `=`.
    pub code_keywords: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            max_buffered_keystrokes: 64,
            idle_flush_ms: 1_500,
            suspect_digit_run: 4,
            max_held_chars: 64,
            keywords: [
                "password", "passwd", "pwd", "passcode", "pin", "ssn", "cvv", "cvc", "secret",
                "api key", "api_key", "apikey", "token", "credit", "card", "social",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            code_keywords: ["cvv", "cvc", "ssn", "pin"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RedactionConfig {
    pub fn idle_flush(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.idle_flush_ms as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_age_secs: u64,
    pub max_fragments: usize,
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 120,
            max_fragments: 240,
            max_chars: 24_000,
        }
    }
}

impl ContextConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub excerpt_budget_chars: usize,
    pub daily_limit: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            excerpt_budget_chars: 6_000,
            daily_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Permit a plain `http://` API URL. Only meant for local test servers.
    pub allow_insecure_http: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            request_timeout_secs: 30,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 4_000,
            allow_insecure_http: false,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Session tokens and captured context only travel over TLS unless
    /// `allow_insecure_http` is set.
    pub fn check_transport(&self) -> Result<()> {
        let url = self.api_base_url.trim().to_ascii_lowercase();
        if url.starts_with("https://") {
            return Ok(());
        }
        if self.allow_insecure_http && url.starts_with("http://") {
            warn!("Using unencrypted API URL {}", self.api_base_url);
            return Ok(());
        }
        bail!(
            "backend.api_base_url must use https, got '{}'",
            self.api_base_url
        );
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    pub capture: CaptureConfig,
    pub redaction: RedactionConfig,
    pub context: ContextConfig,
    pub query: QueryConfig,
    pub backend: BackendConfig,
}

impl AssistantConfig {
    /// Read settings from a JSON file. A missing file yields defaults; a file
    /// that does not parse is logged and replaced by defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let config = serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!("Ignoring malformed settings at {}: {err}", path.display());
            Self::default()
        });
        Ok(config)
    }

    /// Apply `INTEGRITY_API_URL` and `INTEGRITY_DAILY_LIMIT` when set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend.api_base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(limit) = env::var(DAILY_LIMIT_ENV) {
            self.query.daily_limit = limit
                .trim()
                .parse()
                .with_context(|| format!("{DAILY_LIMIT_ENV} must be a whole number, got '{limit}'"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.screen_interval_ms == 0 {
            bail!("capture.screen_interval_ms must be greater than zero");
        }
        if self.capture.ocr_timeout_ms == 0 {
            bail!("capture.ocr_timeout_ms must be greater than zero");
        }
        if self.capture.keystroke_queue == 0 {
            bail!("capture.keystroke_queue must be greater than zero");
        }
        if self.capture.idle_check_ms == 0 {
            bail!("capture.idle_check_ms must be greater than zero");
        }
        if self.redaction.max_buffered_keystrokes == 0 {
            bail!("redaction.max_buffered_keystrokes must be greater than zero");
        }
        if self.redaction.suspect_digit_run == 0 {
            bail!("redaction.suspect_digit_run must be greater than zero");
        }
        if self.context.max_age_secs == 0 || self.context.max_fragments == 0 || self.context.max_chars == 0 {
            bail!("context bounds must all be greater than zero");
        }
        if self.query.excerpt_budget_chars > self.context.max_chars {
            bail!(
                "query.excerpt_budget_chars ({}) exceeds context.max_chars ({})",
                self.query.excerpt_budget_chars,
                self.context.max_chars
            );
        }
        if self.backend.backoff_base_ms > self.backend.backoff_max_ms {
            bail!("backend.backoff_base_ms must not exceed backend.backoff_max_ms");
        }
        if self.backend.request_timeout_secs == 0 {
            bail!("backend.request_timeout_secs must be greater than zero");
        }
        self.backend.check_transport()?;
        Ok(())
    }
}
