use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::CapturedFragment;
use crate::settings::RedactionConfig;

use super::events::{FieldId, Key, KeyEvent};
use super::patterns::PatternSet;
use super::state::{FieldState, FieldTracker, Rules};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Turns raw key events into sanitized keystroke fragments.
///
/// Each field gets its own [`FieldTracker`]. A key for a different field, a
/// focus change, Enter, Tab or Escape closes the current field: its text is
/// flushed (unless sensitive) and its state returns to `Normal`.
///
/// The filter never fails on input. Events it cannot interpret are dropped.
pub struct RedactionFilter {
    rules: Rules,
    active: Option<FieldId>,
    fields: HashMap<FieldId, FieldTracker>,
    dropped_events: u64,
}

impl RedactionFilter {
    pub fn new(config: RedactionConfig) -> Result<Self> {
        Ok(Self {
            rules: Rules {
                patterns: PatternSet::new(&config)?,
                config,
            },
            active: None,
            fields: HashMap::new(),
            dropped_events: 0,
        })
    }

    pub fn process(&mut self, event: KeyEvent) -> Vec<CapturedFragment> {
        let mut out = Vec::new();
        let KeyEvent { key, at, field } = event;

        if self.active.as_ref() != Some(&field.id) {
            self.switch_to(field.id.clone(), &mut out);
        }

        let idle = self.rules.config.idle_flush();
        let rules = &self.rules;
        let tracker = self.fields.entry(field.id.clone()).or_default();

        if tracker.is_idle(at, idle) {
            tracker.flush(rules, &mut out);
        }
        if field.is_secure() {
            tracker.mark_secure(at);
        }

        match key {
            Key::Char(c) if c.is_control() => {
                self.dropped_events += 1;
                log_debug!("dropping control character U+{:04X}", c as u32);
            }
            Key::Char(c) => tracker.push(c, at, rules, &mut out),
            Key::Space => tracker.push(' ', at, rules, &mut out),
            Key::Backspace => tracker.backspace(at, rules, &mut out),
            Key::Enter | Key::Tab | Key::Escape => self.close(&field.id, &mut out),
            Key::Other(name) => {
                self.dropped_events += 1;
                log_debug!("ignoring non-text key {name}");
            }
        }

        out
    }

    /// Focus moved to `field` without a key press.
    pub fn focus_changed(&mut self, field: FieldId) -> Vec<CapturedFragment> {
        let mut out = Vec::new();
        if self.active.as_ref() != Some(&field) {
            self.switch_to(field, &mut out);
        }
        out
    }

    /// Flush every field whose last key is at least the idle gap old.
    pub fn flush_idle(&mut self, now: DateTime<Utc>) -> Vec<CapturedFragment> {
        let mut out = Vec::new();
        let idle = self.rules.config.idle_flush();
        for tracker in self.fields.values_mut() {
            if tracker.is_idle(now, idle) {
                tracker.flush(&self.rules, &mut out);
            }
        }
        out
    }

    pub fn field_state(&self, field: &FieldId) -> FieldState {
        self.fields
            .get(field)
            .map(FieldTracker::state)
            .unwrap_or_default()
    }

    /// Discard all buffered text without emitting it.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.active = None;
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    fn switch_to(&mut self, field: FieldId, out: &mut Vec<CapturedFragment>) {
        if let Some(previous) = self.active.take() {
            self.close(&previous, out);
        }
        self.active = Some(field);
    }

    fn close(&mut self, field: &FieldId, out: &mut Vec<CapturedFragment>) {
        if let Some(tracker) = self.fields.remove(field) {
            tracker.close(&self.rules, out);
        }
    }
}
