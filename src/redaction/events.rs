use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a logical input field as reported by the OS hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder used when the platform cannot tell fields apart.
    pub fn unknown() -> Self {
        Self("unknown".into())
    }
}

/// What the platform knows about the focused field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldContext {
    pub id: FieldId,
    /// `true` for password/secure-text fields, `None` when the platform
    /// cannot tell.
    pub secure: Option<bool>,
}

impl FieldContext {
    pub fn plain(id: impl Into<String>) -> Self {
        Self {
            id: FieldId::new(id),
            secure: Some(false),
        }
    }

    pub fn secure(id: impl Into<String>) -> Self {
        Self {
            id: FieldId::new(id),
            secure: Some(true),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Char(char),
    Space,
    Backspace,
    Enter,
    Tab,
    Escape,
    /// Anything else the hook reports (arrows, modifiers, media keys).
    Other(String),
}

impl Key {
    /// Keys that end the current logical input.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Key::Enter | Key::Tab | Key::Escape)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    pub at: DateTime<Utc>,
    pub field: FieldContext,
}

impl KeyEvent {
    pub fn new(key: Key, at: DateTime<Utc>, field: FieldContext) -> Self {
        Self { key, at, field }
    }
}
