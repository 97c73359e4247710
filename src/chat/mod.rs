//! The conversational retrieval-augmented chat flow.
//!
//! One turn = history rebuild → question condensing → retrieval → answer
//! synthesis → optional chat rename → persistence. The stages live in
//! [`pipeline`]; [`history`] is the immutable conversation memory rebuilt
//! from persisted rows on every request; [`prompts`] holds the fixed
//! instruction templates.

pub mod history;
pub mod pipeline;
pub mod prompts;

pub use history::ChatHistory;
pub use pipeline::{ChatPipeline, TurnOutcome, DEFAULT_NAME_PREFIX, RETRIEVAL_K};
