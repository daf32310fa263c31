//! Question classification: heuristic override first, chat model second.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::PipelineError;
use crate::lm::{ChatMessage, ChatModel, ChatRequest, ModelProfile};
use crate::prompts;

/// Which path a question takes. Chosen once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionCategory {
    QueryRequired,
    Documentation,
    General,
}

impl QuestionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionCategory::QueryRequired => "QUERY_REQUIRED",
            QuestionCategory::Documentation => "DOCUMENTATION",
            QuestionCategory::General => "GENERAL",
        }
    }
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reporting-intent patterns, tried in order. Any match means the question
/// needs a query.
const QUERY_HINT_PATTERNS: &[&str] = &[
    r"\btop\s*\d+\b",
    r"\bhow\s+(many|much)\b",
    r"\b(total|sum|average|count)\b",
    r"\b(revenue|sales|turnover|profit|income)\b",
    r"\b(best|worst)[\s-]+sell(ing|er|ers)?\b",
    r"\b(inventory|in\s+stock|out\s+of\s+stock|stock\s+level)\b",
    r"\b(report|statistics|stats)\b",
    r"\b(per|by)\s+(day|week|month|quarter|year)\b",
    r"\b(last|past)\s+\d+\s+(days?|weeks?|months?|years?)\b",
    r"\b(this|last)\s+(week|month|quarter|year)\b",
    r"\bbetween\s+\S+\s+and\s+\S+",
    r"\b(products?|orders?|customers?|suppliers?|categor(y|ies)|brands?)\b",
    r"bán\s+chạy",
    r"doanh\s*thu",
    r"đơn\s*hàng",
    r"tồn\s*kho",
    r"thống\s*kê",
    r"báo\s*cáo",
    r"bao\s*nhiêu",
    r"tổng\s+số",
    r"theo\s+(ngày|tháng|năm)",
    r"lợi\s*nhuận",
    r"sản\s*phẩm",
    r"khách\s*hàng",
];

pub struct QuestionClassifier {
    patterns: Vec<Regex>,
    profile: ModelProfile,
    keep_alive: Option<String>,
}

impl QuestionClassifier {
    pub fn new(profile: ModelProfile, keep_alive: Option<String>) -> Self {
        let patterns = QUERY_HINT_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?i){pattern}")).expect("regex for query hint pattern")
            })
            .collect();
        Self {
            patterns,
            profile,
            keep_alive,
        }
    }

    /// Heuristic override: `Some(QueryRequired)` when any pattern matches.
    pub fn heuristic(&self, question: &str) -> Option<QuestionCategory> {
        let q = question.trim().to_lowercase();
        self.patterns
            .iter()
            .position(|pattern| pattern.is_match(&q))
            .map(|idx| {
                tracing::debug!(pattern = QUERY_HINT_PATTERNS[idx], "heuristic classification");
                QuestionCategory::QueryRequired
            })
    }

    /// Classify a question. Heuristic matches never reach the model. The model
    /// call is made once, without retry.
    pub fn classify(
        &self,
        model: &dyn ChatModel,
        question: &str,
        timeout: Duration,
    ) -> Result<QuestionCategory, PipelineError> {
        if let Some(category) = self.heuristic(question) {
            return Ok(category);
        }
        let request = ChatRequest::new(
            &self.profile,
            vec![
                ChatMessage::system(prompts::classifier_prompt()),
                ChatMessage::user(question),
            ],
            timeout,
        )
        .keep_alive(self.keep_alive.as_deref());
        let raw = model
            .chat(&request)
            .map_err(PipelineError::ClassificationFailure)?;
        let category = parse_label(&raw);
        tracing::debug!(raw = %raw, %category, "model classification");
        Ok(category)
    }
}

/// Defensive label parse. Unrecognized output falls back to GENERAL.
pub fn parse_label(raw: &str) -> QuestionCategory {
    let label: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    if label.contains("QUERY_REQUIRED") || label.contains("SQL_REQUIRED") {
        QuestionCategory::QueryRequired
    } else if label.contains("DOCUMENTATION") {
        QuestionCategory::Documentation
    } else {
        QuestionCategory::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::LmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        reply: &'static str,
        calls: AtomicUsize,
    }

    impl ChatModel for CountingModel {
        fn chat(&self, _: &ChatRequest) -> Result<String, LmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    struct FailingModel;

    impl ChatModel for FailingModel {
        fn chat(&self, request: &ChatRequest) -> Result<String, LmError> {
            Err(LmError::Timeout(request.timeout))
        }
    }

    fn classifier() -> QuestionClassifier {
        QuestionClassifier::new(ModelProfile::new("classifier", 16, Some(512)), None)
    }

    #[test]
    fn heuristic_matches_skip_the_model() {
        let model = CountingModel {
            reply: "GENERAL",
            calls: AtomicUsize::new(0),
        };
        let questions = [
            "list current products in stock",
            "Top 5 best-selling items",
            "How many orders did we get last 30 days?",
            "revenue by month",
            "cho tôi xem doanh thu tháng này",
            "hãy liệt kê danh sách sản phẩm",
        ];
        for question in questions {
            let category = classifier()
                .classify(&model, question, Duration::from_secs(1))
                .unwrap();
            assert_eq!(category, QuestionCategory::QueryRequired, "{question}");
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unmatched_question_asks_the_model_once() {
        let model = CountingModel {
            reply: "documentation.",
            calls: AtomicUsize::new(0),
        };
        let category = classifier()
            .classify(&model, "what is the return policy", Duration::from_secs(1))
            .unwrap();
        assert_eq!(category, QuestionCategory::Documentation);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn model_failure_is_a_classification_failure() {
        let err = classifier()
            .classify(&FailingModel, "hello", Duration::from_millis(5))
            .unwrap_err();
        assert_eq!(err.kind(), "classification_failure");
    }

    #[test]
    fn label_parse_uses_priority_and_defaults_to_general() {
        assert_eq!(parse_label(" query_required. "), QuestionCategory::QueryRequired);
        assert_eq!(parse_label("SQL_REQUIRED"), QuestionCategory::QueryRequired);
        assert_eq!(
            parse_label("DOCUMENTATION or QUERY_REQUIRED"),
            QuestionCategory::QueryRequired
        );
        assert_eq!(parse_label("GENERAL!"), QuestionCategory::General);
        assert_eq!(parse_label("I think this is small talk"), QuestionCategory::General);
        assert_eq!(parse_label(""), QuestionCategory::General);
    }

    #[test]
    fn greetings_do_not_match_heuristics() {
        assert_eq!(classifier().heuristic("hello"), None);
        assert_eq!(classifier().heuristic("xin chào, bạn là ai"), None);
    }
}
