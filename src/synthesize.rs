//! Natural-language answers from a bounded, de-noised row sample.
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SynthesisFailure;
use crate::lm::{ChatMessage, ChatModel, ChatRequest, ModelProfile};
use crate::prompts;
use crate::store::{CellValue, ResultSet};

pub const DEFAULT_SAMPLE_ROWS: usize = 5;

/// Columns never shown to the summary model.
pub const DEFAULT_NOISE_COLUMNS: &[&str] = &[
    "description",
    "image",
    "image_url",
    "thumbnail",
    "created_at",
    "updated_at",
    "deleted_at",
    "brand_id",
    "password",
    "password_hash",
];

/// Answer text and locale settings for the summary model.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub language: String,
    pub currency: String,
    pub sample_rows: usize,
    pub noise_columns: Vec<String>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            currency: "USD".to_string(),
            sample_rows: DEFAULT_SAMPLE_ROWS,
            noise_columns: DEFAULT_NOISE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

pub struct AnswerSynthesizer {
    model: Arc<dyn ChatModel>,
    profile: ModelProfile,
    keep_alive: Option<String>,
    settings: SynthesisSettings,
}

impl AnswerSynthesizer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        profile: ModelProfile,
        keep_alive: Option<String>,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            model,
            profile,
            keep_alive,
            settings,
        }
    }

    pub fn synthesize(
        &self,
        question: &str,
        result: &ResultSet,
        timeout: Duration,
    ) -> Result<String, SynthesisFailure> {
        let data = Value::Array(self.sample(result)).to_string();
        let request = ChatRequest::new(
            &self.profile,
            vec![
                ChatMessage::system(prompts::summary_prompt(
                    &self.settings.language,
                    &self.settings.currency,
                )),
                ChatMessage::user(prompts::summary_input(question, &data)),
            ],
            timeout,
        )
        .keep_alive(self.keep_alive.as_deref());
        self.model.chat(&request).map_err(SynthesisFailure)
    }

    /// First `sample_rows` rows as JSON objects, noise columns removed and
    /// payload cells replaced by placeholders.
    pub fn sample(&self, result: &ResultSet) -> Vec<Value> {
        let kept: Vec<(usize, &String)> = result
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !self.is_noise(name))
            .collect();
        result
            .rows
            .iter()
            .take(self.settings.sample_rows)
            .map(|row| {
                let mut object = Map::new();
                for (idx, name) in &kept {
                    let cell = row.get(*idx).unwrap_or(&CellValue::Null);
                    object.insert((*name).clone(), cell_json(cell));
                }
                Value::Object(object)
            })
            .collect()
    }

    fn is_noise(&self, column: &str) -> bool {
        self.settings
            .noise_columns
            .iter()
            .any(|noise| noise.eq_ignore_ascii_case(column))
    }
}

fn cell_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Integer(v) => Value::from(*v),
        CellValue::Real(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        CellValue::Text(text) if text.starts_with("data:image") => Value::from("[IMAGE]"),
        CellValue::Text(text) => Value::from(text.as_str()),
        CellValue::Blob(len) => Value::from(format!("[BINARY {len} bytes]")),
    }
}

/// Answer used when the rows may not be shown to a model, or the summary call
/// failed. States only how many rows matched.
pub fn count_only_answer(rows: usize) -> String {
    match rows {
        1 => "Found 1 matching record.".to_string(),
        n => format!("Found {n} matching records."),
    }
}
