use serde::Serialize;
use tokio::sync::watch;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CaptureHealth {
    Healthy,
    Degraded { reason: String },
}

impl CaptureHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CaptureHealth::Healthy)
    }
}

/// Counts consecutive failed screen ticks and publishes health transitions.
pub(crate) struct HealthTracker {
    tx: watch::Sender<CaptureHealth>,
    consecutive_failures: u32,
    degraded_after: u32,
}

impl HealthTracker {
    pub fn new(tx: watch::Sender<CaptureHealth>, degraded_after: u32) -> Self {
        Self {
            tx,
            consecutive_failures: 0,
            degraded_after: degraded_after.max(1),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if !self.tx.borrow().is_healthy() {
            log_info!("screen capture recovered");
            self.tx.send_replace(CaptureHealth::Healthy);
        }
    }

    pub fn record_failure(&mut self, reason: &str) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.degraded_after && self.tx.borrow().is_healthy() {
            log_warn!(
                "screen capture degraded after {} failed ticks: {reason}",
                self.consecutive_failures
            );
            self.tx.send_replace(CaptureHealth::Degraded {
                reason: reason.to_string(),
            });
        }
    }
}
