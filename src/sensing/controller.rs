use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::redaction::{PatternSet, RedactionFilter};
use crate::settings::{CaptureConfig, RedactionConfig};

use super::engines::{OcrEngine, ScreenCapturer};
use super::health::{CaptureHealth, HealthTracker};
use super::keystroke_worker::{keystroke_loop, KeystrokeTap, TapEvent};
use super::loop_worker::ScreenSampler;

struct Running {
    cancel_token: CancellationToken,
    screen: JoinHandle<()>,
    keys: JoinHandle<mpsc::Receiver<TapEvent>>,
}

/// Owns both capture loops: start, stop, pause and health.
pub struct CaptureController {
    capturer: Arc<dyn ScreenCapturer>,
    ocr: Arc<dyn OcrEngine>,
    store: ContextStore,
    capture: CaptureConfig,
    redaction: RedactionConfig,
    parent_token: CancellationToken,
    tap: KeystrokeTap,
    tap_rx: Option<mpsc::Receiver<TapEvent>>,
    pause_tx: watch::Sender<bool>,
    health_tx: watch::Sender<CaptureHealth>,
    running: Option<Running>,
}

impl CaptureController {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        ocr: Arc<dyn OcrEngine>,
        store: ContextStore,
        capture: CaptureConfig,
        redaction: RedactionConfig,
        parent_token: CancellationToken,
    ) -> Self {
        let (tap, tap_rx) = KeystrokeTap::channel(capture.keystroke_queue);
        let (pause_tx, _) = watch::channel(false);
        let (health_tx, _) = watch::channel(CaptureHealth::Healthy);
        Self {
            capturer,
            ocr,
            store,
            capture,
            redaction,
            parent_token,
            tap,
            tap_rx: Some(tap_rx),
            pause_tx,
            health_tx,
            running: None,
        }
    }

    /// Handle for the platform keyboard hook. Stays valid across restarts.
    pub fn tap(&self) -> KeystrokeTap {
        self.tap.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("capture already active");
        }
        if self.parent_token.is_cancelled() {
            bail!("capture cannot start after shutdown");
        }

        let filter = RedactionFilter::new(self.redaction.clone()).context("invalid redaction settings")?;
        let patterns = PatternSet::new(&self.redaction).context("invalid redaction settings")?;

        let mut events = match self.tap_rx.take() {
            Some(rx) => rx,
            None => {
                let (tap, rx) = KeystrokeTap::channel(self.capture.keystroke_queue);
                self.tap = tap;
                rx
            }
        };
        // Keys typed while capture was off are not context.
        while events.try_recv().is_ok() {}

        self.health_tx.send_replace(CaptureHealth::Healthy);
        let cancel_token = self.parent_token.child_token();

        let sampler = ScreenSampler::new(
            Arc::clone(&self.capturer),
            Arc::clone(&self.ocr),
            self.store.clone(),
            patterns,
            self.capture.clone(),
        );
        let health = HealthTracker::new(self.health_tx.clone(), self.capture.degraded_after);
        let screen = tokio::spawn(sampler.run(health, self.pause_tx.subscribe(), cancel_token.clone()));

        let keys = tokio::spawn(keystroke_loop(
            filter,
            self.store.clone(),
            events,
            self.pause_tx.subscribe(),
            self.capture.idle_check(),
            cancel_token.clone(),
        ));

        self.running = Some(Running {
            cancel_token,
            screen,
            keys,
        });
        info!("capture started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancel_token.cancel();

        let (screen, keys) = tokio::join!(running.screen, running.keys);
        match keys {
            Ok(rx) => self.tap_rx = Some(rx),
            Err(err) => error!("keystroke sampler ended abnormally: {err}"),
        }
        screen.context("screen sampler task failed to join")?;
        info!("capture stopped");
        Ok(())
    }

    pub fn set_paused(&self, paused: bool) {
        let previous = self.pause_tx.send_replace(paused);
        if previous != paused {
            info!("capture {}", if paused { "paused" } else { "resumed" });
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    pub fn health(&self) -> CaptureHealth {
        self.health_tx.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<CaptureHealth> {
        self.health_tx.subscribe()
    }
}
