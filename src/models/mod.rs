pub mod fragment;
pub mod query;

pub use fragment::{CapturedFragment, FragmentSource};
pub use query::{Answer, AssembledPrompt, QueryRequest};
