use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FragmentSource {
    Screen,
    Keystroke,
}

impl FragmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentSource::Screen => "screen",
            FragmentSource::Keystroke => "keystroke",
        }
    }
}

/// A timestamped unit of captured text.
///
/// Fields are private so a fragment cannot change after a sampler builds it.
/// Only the context store holds fragments long term, and only in memory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedFragment {
    source: FragmentSource,
    text: String,
    timestamp: DateTime<Utc>,
    sensitive: bool,
}

impl CapturedFragment {
    /// A fragment that passed redaction.
    pub fn sanitized(source: FragmentSource, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            text: text.into(),
            timestamp,
            sensitive: false,
        }
    }

    /// A fragment flagged as sensitive. The context store refuses these; the
    /// constructor exists so that refusal can be exercised.
    pub fn flagged_sensitive(
        source: FragmentSource,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            text: text.into(),
            timestamp,
            sensitive: true,
        }
    }

    pub fn source(&self) -> FragmentSource {
        self.source
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Cut the text down to `max_chars` characters on a char boundary.
    pub(crate) fn truncate_chars(&mut self, max_chars: usize) {
        if let Some((idx, _)) = self.text.char_indices().nth(max_chars) {
            self.text.truncate(idx);
        }
    }
}
