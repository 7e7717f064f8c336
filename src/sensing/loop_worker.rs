use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::models::{CapturedFragment, FragmentSource};
use crate::redaction::PatternSet;
use crate::settings::CaptureConfig;

use super::engines::{OcrEngine, ScreenCapturer};
use super::health::HealthTracker;
use super::phash::{compute_hamming_distance, compute_phash};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleOutcome {
    Inserted { chars: usize, redactions: usize },
    /// Frame too close to the last OCR'd one.
    Unchanged,
    Empty,
    /// Same text as the previous screen fragment.
    Duplicate,
    Refused,
}

/// Periodic screen capture feeding OCR text into the context store.
pub(crate) struct ScreenSampler {
    capturer: Arc<dyn ScreenCapturer>,
    ocr: Arc<dyn OcrEngine>,
    store: ContextStore,
    patterns: PatternSet,
    config: CaptureConfig,
    last_ocr_hash: Option<String>,
    last_ocr_at: Option<Instant>,
    last_text: Option<String>,
}

impl ScreenSampler {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        ocr: Arc<dyn OcrEngine>,
        store: ContextStore,
        patterns: PatternSet,
        config: CaptureConfig,
    ) -> Self {
        Self {
            capturer,
            ocr,
            store,
            patterns,
            config,
            last_ocr_hash: None,
            last_ocr_at: None,
            last_text: None,
        }
    }

    pub async fn run(
        mut self,
        mut health: HealthTracker,
        pause_rx: watch::Receiver<bool>,
        cancel_token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.screen_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log_info!(
            "screen sampler started ({}ms interval)",
            self.config.screen_interval_ms
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *pause_rx.borrow() {
                        continue;
                    }
                    // The frame in flight is dropped if cancellation wins.
                    tokio::select! {
                        _ = self.tick(&mut health) => {}
                        _ = cancel_token.cancelled() => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        log_info!("screen sampler shutting down");
    }

    /// One interval: up to `capture_retries + 1` attempts, each bounded by
    /// the OCR timeout.
    async fn tick(&mut self, health: &mut HealthTracker) {
        let attempts = self.config.capture_retries.saturating_add(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.ocr_timeout(), self.sample_once()).await {
                Ok(Ok(outcome)) => {
                    match outcome {
                        SampleOutcome::Inserted { chars, redactions } => {
                            log_debug!("screen fragment stored ({chars} chars, {redactions} redactions)")
                        }
                        other => log_debug!("screen tick produced no fragment: {other:?}"),
                    }
                    health.record_success();
                    return;
                }
                Ok(Err(err)) => {
                    log_warn!("screen sample attempt {attempt}/{attempts} failed: {err:#}");
                    last_failure = format!("{err:#}");
                }
                Err(_) => {
                    log_warn!(
                        "screen sample attempt {attempt}/{attempts} timed out (> {}ms)",
                        self.config.ocr_timeout_ms
                    );
                    last_failure = "capture or OCR timed out".into();
                }
            }
        }

        health.record_failure(&last_failure);
    }

    pub(crate) async fn sample_once(&mut self) -> Result<SampleOutcome> {
        let captured_at = Utc::now();
        let frame = self.capturer.capture().await.context("screen capture failed")?;
        let frame = Arc::new(frame);

        let hash = tokio::task::spawn_blocking({
            let bytes = Arc::clone(&frame);
            move || compute_phash(&bytes)
        })
        .await
        .context("phash worker join failed")?;
        let hash = match hash {
            Ok(hash) => Some(hash),
            Err(err) => {
                log_debug!("frame hash unavailable, running OCR anyway: {err}");
                None
            }
        };

        if !self.should_run_ocr(hash.as_deref()) {
            return Ok(SampleOutcome::Unchanged);
        }

        let raw = self
            .ocr
            .extract_text(&frame)
            .await
            .context("ocr failed")?;
        drop(frame);
        self.last_ocr_hash = hash;
        self.last_ocr_at = Some(Instant::now());

        let text = collapse_whitespace(&raw);
        if text.is_empty() {
            return Ok(SampleOutcome::Empty);
        }

        let scrubbed = self.patterns.scrub(&text);
        if self.last_text.as_deref() == Some(scrubbed.text.as_str()) {
            return Ok(SampleOutcome::Duplicate);
        }

        let chars = scrubbed.text.chars().count();
        let fragment = CapturedFragment::sanitized(FragmentSource::Screen, scrubbed.text.clone(), captured_at);
        if !self.store.insert(fragment) {
            return Ok(SampleOutcome::Refused);
        }
        self.last_text = Some(scrubbed.text);

        Ok(SampleOutcome::Inserted {
            chars,
            redactions: scrubbed.redactions,
        })
    }

    fn should_run_ocr(&self, current: Option<&str>) -> bool {
        let (Some(current), Some(previous)) = (current, self.last_ocr_hash.as_deref()) else {
            return true;
        };

        let refresh_due = self
            .last_ocr_at
            .map_or(true, |at| at.elapsed() >= self.config.ocr_refresh());
        if refresh_due {
            return true;
        }

        compute_hamming_distance(current, previous) >= self.config.phash_change_threshold
    }
}

/// Collapse every whitespace run to one space and trim the ends.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::health::CaptureHealth;
    use crate::sensing::phash::tests::ramp_png;
    use crate::settings::{ContextConfig, RedactionConfig};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedFrame(Vec<u8>);

    #[async_trait]
    impl ScreenCapturer for FixedFrame {
        async fn capture(&self) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct FailingCapturer;

    #[async_trait]
    impl ScreenCapturer for FailingCapturer {
        async fn capture(&self) -> Result<Vec<u8>> {
            Err(anyhow!("display asleep"))
        }
    }

    struct ScriptedOcr {
        texts: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl ScriptedOcr {
        fn new(texts: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                texts: Mutex::new(texts.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrEngine for ScriptedOcr {
        async fn extract_text(&self, _image: &[u8]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow!("no more text"))
        }
    }

    fn sampler(capturer: Arc<dyn ScreenCapturer>, ocr: Arc<dyn OcrEngine>, config: CaptureConfig) -> (ScreenSampler, ContextStore) {
        let store = ContextStore::new(&ContextConfig::default());
        let patterns = PatternSet::new(&RedactionConfig::default()).unwrap();
        (
            ScreenSampler::new(capturer, ocr, store.clone(), patterns, config),
            store,
        )
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace("  Total:\n\n $42\t due  "), "Total: $42 due");
        assert_eq!(collapse_whitespace(" \n\t "), "");
    }

    #[tokio::test]
    async fn ocr_text_is_scrubbed_before_insert() {
        let ocr = ScriptedOcr::new(&["Pay with 4111 1111 1111 1111\nthanks"]);
        let (mut sampler, store) = sampler(Arc::new(FixedFrame(b"raw".to_vec())), ocr, CaptureConfig::default());

        let outcome = sampler.sample_once().await.unwrap();
        assert_eq!(outcome, SampleOutcome::Inserted { chars: 26, redactions: 1 });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text(), "Pay with [redacted] thanks");
        assert_eq!(snapshot[0].source(), FragmentSource::Screen);
    }

    #[tokio::test]
    async fn unchanged_frame_skips_ocr() {
        let ocr = ScriptedOcr::new(&["first", "second"]);
        let (mut sampler, store) = sampler(Arc::new(FixedFrame(ramp_png(false))), ocr.clone(), CaptureConfig::default());

        assert!(matches!(sampler.sample_once().await.unwrap(), SampleOutcome::Inserted { .. }));
        assert_eq!(sampler.sample_once().await.unwrap(), SampleOutcome::Unchanged);
        assert_eq!(ocr.calls(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn refresh_interval_forces_ocr_on_unchanged_frame() {
        let config = CaptureConfig {
            ocr_refresh_secs: 0,
            ..CaptureConfig::default()
        };
        let ocr = ScriptedOcr::new(&["first", "second"]);
        let (mut sampler, store) = sampler(Arc::new(FixedFrame(ramp_png(false))), ocr.clone(), config);

        sampler.sample_once().await.unwrap();
        sampler.sample_once().await.unwrap();
        assert_eq!(ocr.calls(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_and_empty_text_are_not_stored() {
        let ocr = ScriptedOcr::new(&["same  text", "same text", "   "]);
        let (mut sampler, store) = sampler(Arc::new(FixedFrame(b"raw".to_vec())), ocr, CaptureConfig::default());

        assert!(matches!(sampler.sample_once().await.unwrap(), SampleOutcome::Inserted { .. }));
        assert_eq!(sampler.sample_once().await.unwrap(), SampleOutcome::Duplicate);
        assert_eq!(sampler.sample_once().await.unwrap(), SampleOutcome::Empty);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_ticks_degrade_health_without_stopping() {
        let config = CaptureConfig {
            capture_retries: 1,
            degraded_after: 2,
            ..CaptureConfig::default()
        };
        let ocr = ScriptedOcr::new(&[]);
        let (mut sampler, _store) = sampler(Arc::new(FailingCapturer), ocr, config);
        let (tx, rx) = watch::channel(CaptureHealth::Healthy);
        let mut health = HealthTracker::new(tx, 2);

        sampler.tick(&mut health).await;
        assert!(rx.borrow().is_healthy());
        sampler.tick(&mut health).await;
        assert!(!rx.borrow().is_healthy());
    }

    #[tokio::test]
    async fn loop_stops_promptly_on_cancel() {
        let config = CaptureConfig {
            screen_interval_ms: 10,
            ..CaptureConfig::default()
        };
        let ocr = ScriptedOcr::new(&["a", "b", "c"]);
        let (sampler, _store) = sampler(Arc::new(FixedFrame(b"raw".to_vec())), ocr, config);
        let (tx, _rx) = watch::channel(CaptureHealth::Healthy);
        let (_pause_tx, pause_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(sampler.run(HealthTracker::new(tx, 3), pause_rx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn paused_loop_captures_nothing() {
        let config = CaptureConfig {
            screen_interval_ms: 5,
            ..CaptureConfig::default()
        };
        let ocr = ScriptedOcr::new(&["a", "b", "c"]);
        let (sampler, store) = sampler(Arc::new(FixedFrame(b"raw".to_vec())), ocr.clone(), config);
        let (tx, _rx) = watch::channel(CaptureHealth::Healthy);
        let (_pause_tx, pause_rx) = watch::channel(true);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(sampler.run(HealthTracker::new(tx, 3), pause_rx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(ocr.calls(), 0);
        assert!(store.is_empty());
    }
}
