use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{CapturedFragment, FragmentSource};
use crate::settings::RedactionConfig;

use super::patterns::{Assessment, PatternSet};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FieldState {
    #[default]
    Normal,
    /// The buffer tail might be secret; it is held back from flushes.
    Suspect,
    /// Everything typed is discarded until the field ends.
    Sensitive,
}

pub(crate) struct Rules {
    pub patterns: PatternSet,
    pub config: RedactionConfig,
}

/// Buffer and sensitivity state for one input field.
#[derive(Debug, Default)]
pub(crate) struct FieldTracker {
    state: FieldState,
    buffer: String,
    /// Byte offset where held text starts while `Suspect`.
    hold_from: usize,
    last_key_at: Option<DateTime<Utc>>,
}

impl FieldTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FieldState {
        self.state
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle: Duration) -> bool {
        !self.buffer.is_empty()
            && self
                .last_key_at
                .map(|last| now - last >= idle)
                .unwrap_or(false)
    }

    /// The platform reported a secure field: drop whatever was buffered.
    pub fn mark_secure(&mut self, at: DateTime<Utc>) {
        if self.state != FieldState::Sensitive {
            log_debug!("secure field reported, discarding {} buffered chars", self.buffer.chars().count());
        }
        self.enter_sensitive();
        self.last_key_at = Some(at);
    }

    pub fn push(&mut self, c: char, at: DateTime<Utc>, rules: &Rules, out: &mut Vec<CapturedFragment>) {
        self.last_key_at = Some(at);
        if self.state == FieldState::Sensitive {
            return;
        }

        self.buffer.push(c);
        self.reassess(at, rules, out);

        if self.state != FieldState::Sensitive
            && self.buffer.chars().count() >= rules.config.max_buffered_keystrokes
        {
            self.flush(rules, out);
        }
    }

    pub fn backspace(&mut self, at: DateTime<Utc>, rules: &Rules, out: &mut Vec<CapturedFragment>) {
        self.last_key_at = Some(at);
        if self.state == FieldState::Sensitive || self.buffer.pop().is_none() {
            return;
        }
        self.reassess(at, rules, out);
    }

    /// Release buffered text that is not held. Used for idle and size flushes.
    pub fn flush(&mut self, rules: &Rules, out: &mut Vec<CapturedFragment>) {
        let at = self.last_key_at.unwrap_or_else(Utc::now);
        match self.state {
            FieldState::Sensitive => self.buffer.clear(),
            FieldState::Normal => {
                let text = std::mem::take(&mut self.buffer);
                emit(text, at, rules, out);
            }
            FieldState::Suspect => {
                let held = self.buffer.split_off(self.hold_from);
                let released = std::mem::take(&mut self.buffer);
                emit(released, at, rules, out);

                if held.chars().count() > rules.config.max_held_chars {
                    log_debug!("held suspect text exceeded {} chars, discarding", rules.config.max_held_chars);
                    self.enter_sensitive();
                } else {
                    self.buffer = held;
                    self.hold_from = 0;
                }
            }
        }
    }

    /// Field boundary: release everything unless sensitive. The tracker is
    /// consumed, which returns the field to `Normal`.
    pub fn close(mut self, rules: &Rules, out: &mut Vec<CapturedFragment>) {
        if self.state == FieldState::Sensitive {
            return;
        }
        let at = self.last_key_at.unwrap_or_else(Utc::now);
        let text = std::mem::take(&mut self.buffer);
        emit(text, at, rules, out);
    }

    fn reassess(&mut self, at: DateTime<Utc>, rules: &Rules, out: &mut Vec<CapturedFragment>) {
        match rules
            .patterns
            .assess(&self.buffer, rules.config.suspect_digit_run)
        {
            Assessment::Clear => {
                self.state = FieldState::Normal;
                self.hold_from = self.buffer.len();
            }
            Assessment::Suspect { hold_from } => {
                self.state = FieldState::Suspect;
                self.hold_from = hold_from;
            }
            Assessment::Sensitive { keep_until } => {
                self.buffer.truncate(keep_until);
                let kept = std::mem::take(&mut self.buffer);
                emit(kept, at, rules, out);
                self.enter_sensitive();
            }
        }
    }

    fn enter_sensitive(&mut self) {
        self.buffer.clear();
        self.hold_from = 0;
        self.state = FieldState::Sensitive;
    }
}

/// Push a keystroke fragment unless it is blank or still matches a
/// sensitive pattern as a whole.
fn emit(text: String, at: DateTime<Utc>, rules: &Rules, out: &mut Vec<CapturedFragment>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if rules.patterns.contains_sensitive(trimmed) {
        log_debug!("dropping keystroke fragment that matched a sensitive pattern");
        return;
    }
    out.push(CapturedFragment::sanitized(FragmentSource::Keystroke, trimmed, at));
}
