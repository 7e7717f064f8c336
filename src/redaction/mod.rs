//! Keystroke redaction.
//!
//! Sensitive text is detected and dropped here, before anything reaches the
//! context store. When in doubt the filter discards.

pub mod events;
pub mod filter;
pub mod patterns;
mod state;

pub use events::{FieldContext, FieldId, Key, KeyEvent};
pub use filter::RedactionFilter;
pub use patterns::{is_card_number, luhn_valid, PatternSet, Scrubbed, REDACTED};
pub use state::FieldState;
