//! Prompt templates compiled into the binary.
//!
//! Templates use `{placeholder}` markers filled by plain string replacement.

const CLASSIFY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/classify.md"));
const GENERATE_QUERY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/generate_query.md"
));
const SUMMARIZE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/summarize.md"));
const GENERAL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/general.md"));
const DOCUMENTATION: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/documentation.md"
));

/// Fixed classifier instruction. Restricts output to one of three labels.
pub fn classifier_prompt() -> &'static str {
    CLASSIFY.trim()
}

/// Generation contract with the schema hint inlined.
pub fn generation_prompt(dialect: &str, schema_hint: &str, question: &str) -> String {
    let schema_hint = if schema_hint.trim().is_empty() {
        "(no tables found)"
    } else {
        schema_hint
    };
    GENERATE_QUERY
        .replace("{dialect}", dialect)
        .replace("{schema_hint}", schema_hint)
        .replace("{question}", question.trim())
}

pub fn summary_prompt(language: &str, currency: &str) -> String {
    SUMMARIZE
        .replace("{language}", language)
        .replace("{currency}", currency)
        .trim()
        .to_string()
}

/// User turn for the summary model: question plus the serialized sample.
pub fn summary_input(question: &str, data_json: &str) -> String {
    format!("Question:\n{}\n\nData returned by the query:\n{data_json}\n", question.trim())
}

pub fn general_prompt(language: &str) -> String {
    GENERAL.replace("{language}", language).trim().to_string()
}

pub fn documentation_prompt(language: &str) -> String {
    DOCUMENTATION.replace("{language}", language).trim().to_string()
}

/// User turn for documentation answers: numbered documents, then the question.
pub fn documentation_input(question: &str, docs: &[String]) -> String {
    let mut input = String::new();
    for (idx, doc) in docs.iter().enumerate() {
        input.push_str(&format!("Document {}:\n{}\n\n", idx + 1, doc.trim()));
    }
    input.push_str(&format!("Question:\n{}\n", question.trim()));
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_prompt_fills_every_placeholder() {
        let prompt = generation_prompt("SQLite", "- products(id INTEGER)", "how many products?");
        assert!(prompt.contains("(SQLite)"));
        assert!(prompt.contains("- products(id INTEGER)"));
        assert!(prompt.contains("Question: how many products?"));
        assert!(!prompt.contains("{schema_hint}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn summary_prompt_states_currency_and_language() {
        let prompt = summary_prompt("Vietnamese", "VND");
        assert!(prompt.contains("in Vietnamese"));
        assert!(prompt.contains("15,000,000 VND"));
        assert!(!prompt.contains("{currency}"));
    }

    #[test]
    fn documentation_input_numbers_documents() {
        let docs = vec!["Returns within 7 days.".to_string(), "Pay by card.".to_string()];
        let input = documentation_input("return policy?", &docs);
        assert!(input.starts_with("Document 1:\nReturns within 7 days."));
        assert!(input.contains("Document 2:\nPay by card."));
        assert!(input.ends_with("Question:\nreturn policy?\n"));
    }
}
