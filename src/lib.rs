//! Context capture, redaction and query dispatch for the Integrity desktop
//! assistant.
//!
//! Two samplers (screen OCR and keystrokes) feed a short in-memory window of
//! sanitized text. A user question is checked against the session's
//! authorization and daily quota, combined with that window, and sent to the
//! language-model backend.

pub mod assistant;
pub mod context;
pub mod models;
pub mod query;
pub mod redaction;
pub mod sensing;
pub mod settings;
pub mod utils;

pub use assistant::Assistant;
pub use context::{ContextStore, StoreStats};
pub use models::{Answer, AssembledPrompt, CapturedFragment, FragmentSource, QueryRequest};
pub use query::{QueryError, SessionInfo};
pub use settings::AssistantConfig;
pub use utils::logging::init_logging;
