//! Guarded natural-language-to-query assistant.
//!
//! Questions are classified, then answered directly, from documentation, or
//! through a generated statement that must pass a read-only safety gate before
//! it touches the database. [`Assistant`] is the entry point.
pub mod classify;
pub mod config;
pub mod deadline;
pub mod docs;
pub mod envelope;
pub mod error;
pub mod execute;
pub mod generate;
pub mod lm;
pub mod pipeline;
pub mod prompts;
pub mod safety;
pub mod sanitize;
pub mod schema;
pub mod store;
pub mod synthesize;

pub use classify::QuestionCategory;
pub use envelope::{CategoryDetail, ResponseEnvelope, ResponseStatus, WarningReason};
pub use error::PipelineError;
pub use pipeline::{AskOptions, AskRequest, Assistant, AssistantSettings};
