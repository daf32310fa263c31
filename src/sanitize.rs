//! Normalize raw generator output into one clean statement.
use crate::error::PipelineError;

const FENCE: &str = "```";

/// Fence language tags dropped after an opening fence.
const FENCE_TAGS: &[&str] = &["sql", "sqlite", "mysql", "postgresql", "postgres"];

/// Leading labels some models put before the statement.
const LABELS: &[&str] = &["sql:", "query:"];

/// Generator output after normalization. Always starts with `SELECT`; still
/// untrusted until it passes the safety gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedQuery(String);

impl SanitizedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Strip fences and labels, collapse to one line, drop trailing `;`, and
/// require the statement to open with `SELECT`.
pub fn sanitize(raw: &str) -> Result<SanitizedQuery, PipelineError> {
    let text = strip_label(strip_fences(raw));
    let collapsed = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let statement = collapsed
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string();

    if !starts_with_select(&statement) {
        return Err(PipelineError::GenerationContractViolation {
            output: raw.to_string(),
        });
    }
    Ok(SanitizedQuery(statement))
}

/// True when the first word is `SELECT`, ignoring case.
pub(crate) fn starts_with_select(text: &str) -> bool {
    let word: String = text
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    word.eq_ignore_ascii_case("select")
}

/// Drop an opening fence (with its language tag) and everything from the next
/// fence on. Text that already opens with `SELECT` only loses a trailing fence;
/// otherwise the first fenced block inside prose is used.
fn strip_fences(text: &str) -> &str {
    let text = text.trim().trim_start_matches('\u{feff}').trim_start();
    let body = match text.strip_prefix(FENCE) {
        Some(rest) => strip_fence_tag(rest),
        None if starts_with_select(text) => text,
        None => match text.find(FENCE) {
            Some(open) => strip_fence_tag(&text[open + FENCE.len()..]),
            None => text,
        },
    };
    let end = body.find(FENCE).unwrap_or(body.len());
    body[..end].trim()
}

fn strip_fence_tag(body: &str) -> &str {
    for tag in FENCE_TAGS {
        if body.get(..tag.len()).is_some_and(|head| head.eq_ignore_ascii_case(tag)) {
            let rest = &body[tag.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest;
            }
        }
    }
    body
}

fn strip_label(text: &str) -> &str {
    let text = text.trim_start();
    for label in LABELS {
        if text.get(..label.len()).is_some_and(|head| head.eq_ignore_ascii_case(label)) {
            return text[label.len()..].trim_start();
        }
    }
    text
}
