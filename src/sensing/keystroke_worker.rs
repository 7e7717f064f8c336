use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::models::CapturedFragment;
use crate::redaction::{FieldId, KeyEvent, RedactionFilter};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapEvent {
    Key(KeyEvent),
    FocusChanged(FieldId),
}

/// Handle the OS keyboard hook pushes events into. Never blocks: when the
/// queue is full the event is dropped and counted.
#[derive(Clone)]
pub struct KeystrokeTap {
    tx: mpsc::Sender<TapEvent>,
    dropped: Arc<AtomicU64>,
}

impl KeystrokeTap {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TapEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn send_key(&self, event: KeyEvent) -> bool {
        self.offer(TapEvent::Key(event))
    }

    pub fn focus_changed(&self, field: FieldId) -> bool {
        self.offer(TapEvent::FocusChanged(field))
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn offer(&self, event: TapEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

fn store_all(store: &ContextStore, fragments: Vec<CapturedFragment>) {
    for fragment in fragments {
        let chars = fragment.char_len();
        if store.insert(fragment) {
            log_debug!("keystroke fragment stored ({chars} chars)");
        }
    }
}

/// Feeds tapped events through the redaction filter into the store until
/// cancelled. Hands the receiver back so the tap survives a restart; events
/// still queued at exit are discarded, as is the filter's buffer.
pub(crate) async fn keystroke_loop(
    mut filter: RedactionFilter,
    store: ContextStore,
    mut events: mpsc::Receiver<TapEvent>,
    mut pause_rx: watch::Receiver<bool>,
    idle_check: Duration,
    cancel_token: CancellationToken,
) -> mpsc::Receiver<TapEvent> {
    let mut idle_ticker = tokio::time::interval(idle_check);
    idle_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pause_open = true;
    log_info!("keystroke sampler started");

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            changed = pause_rx.changed(), if pause_open => {
                if changed.is_err() {
                    pause_open = false;
                } else if *pause_rx.borrow_and_update() {
                    filter.reset();
                    log_debug!("keystroke sampler paused, buffer discarded");
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    log_info!("keystroke tap closed");
                    break;
                };
                if *pause_rx.borrow() {
                    filter.reset();
                    continue;
                }
                let fragments = match event {
                    TapEvent::Key(event) => filter.process(event),
                    TapEvent::FocusChanged(field) => filter.focus_changed(field),
                };
                store_all(&store, fragments);
            }
            _ = idle_ticker.tick() => {
                if !*pause_rx.borrow() {
                    store_all(&store, filter.flush_idle(Utc::now()));
                }
            }
        }
    }

    filter.reset();
    let mut discarded = 0;
    while events.try_recv().is_ok() {
        discarded += 1;
    }
    log_info!(
        "keystroke sampler shutting down ({} queued events discarded, {} dropped by filter)",
        discarded,
        filter.dropped_events()
    );
    events
}
