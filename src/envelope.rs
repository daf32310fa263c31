//! Uniform per-request response.
//!
//! Category-specific fields live in [`CategoryDetail`], so a generated query
//! can only appear on a QUERY_REQUIRED response and related documents only on
//! a DOCUMENTATION one. [`EnvelopeJson`] is the flat wire form.
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classify::QuestionCategory;
use crate::error::PipelineError;

/// Answer placed on every ERROR envelope.
pub const GENERIC_ERROR_ANSWER: &str =
    "Sorry, I could not answer that question right now. Please try again or rephrase it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Warning,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "SUCCESS",
            ResponseStatus::Warning => "WARNING",
            ResponseStatus::Error => "ERROR",
        }
    }
}

/// Non-error conditions that still stop the pipeline short of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningReason {
    NoMatchingData,
    TooManyRows(usize),
    NoDocumentation,
}

impl WarningReason {
    /// Fixed guidance shown instead of a synthesized answer.
    pub fn guidance(&self) -> String {
        match self {
            WarningReason::NoMatchingData => {
                "No matching data was found. Try different filters or a wider date range."
                    .to_string()
            }
            WarningReason::TooManyRows(count) => format!(
                "The query matched {count} rows, too many to summarize. \
                 Narrow the question, for example with a date range or a top-N limit."
            ),
            WarningReason::NoDocumentation => {
                "No documentation related to this question was found.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryDetail {
    /// The request failed before a category was chosen.
    Unclassified,
    General,
    Documentation {
        related_docs: Vec<String>,
    },
    QueryRequired {
        generated_query: Option<String>,
        row_count: Option<usize>,
    },
}

impl CategoryDetail {
    pub fn for_category(category: QuestionCategory) -> Self {
        match category {
            QuestionCategory::General => CategoryDetail::General,
            QuestionCategory::Documentation => CategoryDetail::Documentation {
                related_docs: Vec::new(),
            },
            QuestionCategory::QueryRequired => CategoryDetail::QueryRequired {
                generated_query: None,
                row_count: None,
            },
        }
    }

    pub fn category(&self) -> Option<QuestionCategory> {
        match self {
            CategoryDetail::Unclassified => None,
            CategoryDetail::General => Some(QuestionCategory::General),
            CategoryDetail::Documentation { .. } => Some(QuestionCategory::Documentation),
            CategoryDetail::QueryRequired { .. } => Some(QuestionCategory::QueryRequired),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub question: String,
    pub detail: CategoryDetail,
    pub answer: Option<String>,
    pub error_message: Option<String>,
    pub elapsed: Duration,
}

impl ResponseEnvelope {
    pub fn success(question: &str, detail: CategoryDetail, answer: String, elapsed: Duration) -> Self {
        Self {
            status: ResponseStatus::Success,
            question: question.to_string(),
            detail,
            answer: Some(answer),
            error_message: None,
            elapsed,
        }
    }

    pub fn warning(
        question: &str,
        detail: CategoryDetail,
        reason: WarningReason,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: ResponseStatus::Warning,
            question: question.to_string(),
            detail,
            answer: Some(reason.guidance()),
            error_message: None,
            elapsed,
        }
    }

    /// ERROR envelope carrying only the public text of `err`.
    pub fn error(
        question: &str,
        detail: CategoryDetail,
        err: &PipelineError,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: ResponseStatus::Error,
            question: question.to_string(),
            detail,
            answer: Some(GENERIC_ERROR_ANSWER.to_string()),
            error_message: Some(err.public_message().to_string()),
            elapsed,
        }
    }

    pub fn category(&self) -> Option<QuestionCategory> {
        self.detail.category()
    }

    pub fn generated_query(&self) -> Option<&str> {
        match &self.detail {
            CategoryDetail::QueryRequired {
                generated_query, ..
            } => generated_query.as_deref(),
            _ => None,
        }
    }

    pub fn row_count(&self) -> Option<usize> {
        match &self.detail {
            CategoryDetail::QueryRequired { row_count, .. } => *row_count,
            _ => None,
        }
    }

    pub fn related_docs(&self) -> &[String] {
        match &self.detail {
            CategoryDetail::Documentation { related_docs } => related_docs,
            _ => &[],
        }
    }

    pub fn to_json(&self) -> EnvelopeJson<'_> {
        let related_docs = match &self.detail {
            CategoryDetail::Documentation { related_docs } => Some(related_docs.as_slice()),
            _ => None,
        };
        EnvelopeJson {
            status: self.status,
            question: &self.question,
            category: self.category(),
            answer: self.answer.as_deref(),
            generated_query: self.generated_query(),
            error_message: self.error_message.as_deref(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            row_count: self.row_count(),
            related_docs,
        }
    }
}

/// Flat JSON form. Absent fields are omitted.
#[derive(Debug, Serialize)]
pub struct EnvelopeJson<'a> {
    pub status: ResponseStatus,
    pub question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<QuestionCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'a str>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_docs: Option<&'a [String]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_envelope_json() {
        let envelope = ResponseEnvelope::success(
            "how many products",
            CategoryDetail::QueryRequired {
                generated_query: Some("SELECT COUNT(*) FROM products".to_string()),
                row_count: Some(1),
            },
            "There are 3 products.".to_string(),
            Duration::from_millis(42),
        );
        let value = serde_json::to_value(envelope.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "SUCCESS",
                "question": "how many products",
                "category": "QUERY_REQUIRED",
                "answer": "There are 3 products.",
                "generated_query": "SELECT COUNT(*) FROM products",
                "elapsed_ms": 42,
                "row_count": 1
            })
        );
    }

    #[test]
    fn test_general_envelope_has_no_query_fields() {
        let envelope = ResponseEnvelope::success(
            "hello",
            CategoryDetail::General,
            "Hi!".to_string(),
            Duration::from_millis(5),
        );
        assert_eq!(envelope.generated_query(), None);
        assert_eq!(envelope.row_count(), None);
        assert!(envelope.related_docs().is_empty());
        let value = serde_json::to_value(envelope.to_json()).unwrap();
        assert!(value.get("generated_query").is_none());
        assert!(value.get("related_docs").is_none());
        assert_eq!(value["category"], "GENERAL");
    }

    #[test]
    fn test_error_envelope_uses_public_text() {
        let err = PipelineError::SafetyViolation {
            statement: "DROP TABLE products".to_string(),
            reason: "mutating keyword".to_string(),
        };
        let envelope = ResponseEnvelope::error(
            "drop it",
            CategoryDetail::for_category(QuestionCategory::QueryRequired),
            &err,
            Duration::from_millis(1),
        );
        assert_eq!(envelope.status, ResponseStatus::Error);
        assert_eq!(envelope.answer.as_deref(), Some(GENERIC_ERROR_ANSWER));
        let text = serde_json::to_string(&envelope.to_json()).unwrap();
        assert!(!text.contains("DROP TABLE"));
        assert!(text.contains("\"status\":\"ERROR\""));
    }

    #[test]
    fn test_unclassified_envelope_omits_category() {
        let err = PipelineError::DocumentLookupFailure("io".to_string());
        let envelope =
            ResponseEnvelope::error("?", CategoryDetail::Unclassified, &err, Duration::ZERO);
        let value = serde_json::to_value(envelope.to_json()).unwrap();
        assert!(value.get("category").is_none());
    }

    #[test]
    fn test_warning_guidance_mentions_count() {
        let envelope = ResponseEnvelope::warning(
            "all orders",
            CategoryDetail::QueryRequired {
                generated_query: None,
                row_count: Some(120),
            },
            WarningReason::TooManyRows(120),
            Duration::ZERO,
        );
        assert_eq!(envelope.status, ResponseStatus::Warning);
        assert!(envelope.answer.unwrap().contains("120 rows"));
    }
}
