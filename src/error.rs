//! Error taxonomy for the question pipeline.
//!
//! Inner components either return a typed outcome or one of these errors; only
//! the orchestrator catches them, turning each into an ERROR envelope. The
//! `Display` text is internal detail for logs. `public_message` is the
//! non-leaking text placed on the envelope.
use std::time::Duration;
use thiserror::Error;

use crate::lm::LmError;
use crate::store::StoreError;

/// Fatal pipeline failures. Every variant aborts the request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classification call failed: {0}")]
    ClassificationFailure(#[source] LmError),

    #[error("schema introspection failed: {0}")]
    SchemaIntrospectionFailure(#[source] StoreError),

    #[error("query generation call failed: {0}")]
    GenerationFailure(#[source] LmError),

    #[error("generator output is not a single SELECT statement: {output:?}")]
    GenerationContractViolation { output: String },

    #[error("statement rejected by safety gate ({reason}): {statement:?}")]
    SafetyViolation { statement: String, reason: String },

    #[error("execution failed for {statement:?}: {source}")]
    ExecutionFailure {
        statement: String,
        #[source]
        source: StoreError,
    },

    #[error("document lookup failed: {0}")]
    DocumentLookupFailure(String),

    #[error("reply generation failed: {0}")]
    ReplyFailure(#[source] LmError),

    #[error("request deadline of {}ms exceeded before {stage}", budget.as_millis())]
    DeadlineExceeded { stage: &'static str, budget: Duration },
}

impl PipelineError {
    /// Stable snake_case identifier used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ClassificationFailure(_) => "classification_failure",
            PipelineError::SchemaIntrospectionFailure(_) => "schema_introspection_failure",
            PipelineError::GenerationFailure(_) => "generation_failure",
            PipelineError::GenerationContractViolation { .. } => "generation_contract_violation",
            PipelineError::SafetyViolation { .. } => "safety_violation",
            PipelineError::ExecutionFailure { .. } => "execution_failure",
            PipelineError::DocumentLookupFailure(_) => "document_lookup_failure",
            PipelineError::ReplyFailure(_) => "reply_failure",
            PipelineError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    /// Short user-facing description that never includes statements, paths,
    /// or collaborator error text.
    pub fn public_message(&self) -> &'static str {
        match self {
            PipelineError::ClassificationFailure(_) => "The question could not be classified.",
            PipelineError::SchemaIntrospectionFailure(_) => {
                "The database structure could not be read."
            }
            PipelineError::GenerationFailure(_) => "A database query could not be generated.",
            PipelineError::GenerationContractViolation { .. } => {
                "The generated query was not a single read-only statement."
            }
            PipelineError::SafetyViolation { .. } => {
                "The generated query was blocked by the safety check."
            }
            PipelineError::ExecutionFailure { .. } => "The database query failed to run.",
            PipelineError::DocumentLookupFailure(_) => "The documentation could not be searched.",
            PipelineError::ReplyFailure(_) => "The assistant could not compose a reply.",
            PipelineError::DeadlineExceeded { .. } => "The request took too long to complete.",
        }
    }

    /// Whether the failure came from a collaborator timing out.
    pub fn is_timeout(&self) -> bool {
        match self {
            PipelineError::DeadlineExceeded { .. } => true,
            PipelineError::ClassificationFailure(err)
            | PipelineError::GenerationFailure(err)
            | PipelineError::ReplyFailure(err) => matches!(err, LmError::Timeout(_)),
            PipelineError::ExecutionFailure { source, .. } => {
                matches!(source, StoreError::Timeout(_))
            }
            _ => false,
        }
    }
}

/// Summarization failure. Caught inside the orchestrator and degraded to a
/// SUCCESS envelope that only reports the row count.
#[derive(Debug, Error)]
#[error("answer synthesis failed: {0}")]
pub struct SynthesisFailure(#[source] pub LmError);
