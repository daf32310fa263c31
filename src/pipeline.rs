//! Request orchestration.
//!
//! One [`Assistant`] is built at startup and shared by reference across
//! concurrent requests. Each request walks a linear state machine:
//!
//! ```text
//! classify ─┬─ GENERAL ──────── reply
//!           ├─ DOCUMENTATION ── lookup_docs ── reply
//!           └─ QUERY_REQUIRED ─ introspect ── generate ── sanitize ── validate
//!                                ── execute ─┬─ empty      (WARNING)
//!                                            ├─ oversized  (WARNING)
//!                                            └─ rows ── synthesize (SUCCESS)
//! ```
//!
//! Every failure is caught in [`Assistant::ask_with`] and turned into an
//! ERROR envelope; callers always get a well-formed response.
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{QuestionCategory, QuestionClassifier};
use crate::deadline::Deadline;
use crate::docs::{DocumentRetriever, NoDocuments};
use crate::envelope::{CategoryDetail, ResponseEnvelope, WarningReason};
use crate::error::PipelineError;
use crate::execute::{QueryExecutor, QueryOutcome, DEFAULT_MAX_ROWS};
use crate::generate::{PromptedGenerator, QueryGenerator};
use crate::lm::{ChatMessage, ChatModel, ChatRequest, ModelProfile};
use crate::prompts;
use crate::safety;
use crate::sanitize::sanitize;
use crate::schema::{SchemaHint, SchemaIntrospector, DEFAULT_MAX_CHARS, DEFAULT_MAX_TABLES};
use crate::store::DataStore;
use crate::synthesize::{count_only_answer, AnswerSynthesizer, SynthesisSettings};

/// Per-request flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskOptions {
    /// Put the executed statement on the response.
    pub include_query: bool,
    /// Let the summary model see result rows. When off, the answer only
    /// reports how many rows matched.
    pub allow_data_in_prompt: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            include_query: true,
            allow_data_in_prompt: true,
        }
    }
}

/// JSON request body: `{"message": ..., "include_sql"?: bool,
/// "allow_llm_to_see_data"?: bool}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AskRequest {
    pub message: String,
    #[serde(default = "default_true")]
    pub include_sql: bool,
    #[serde(default = "default_true")]
    pub allow_llm_to_see_data: bool,
}

fn default_true() -> bool {
    true
}

impl AskRequest {
    pub fn options(&self) -> AskOptions {
        AskOptions {
            include_query: self.include_sql,
            allow_data_in_prompt: self.allow_llm_to_see_data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per model call.
    pub llm: Duration,
    /// Per statement execution.
    pub query: Duration,
    /// Whole request. `None` leaves only the per-call limits.
    pub request: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_secs(60),
            query: Duration::from_secs(10),
            request: Some(Duration::from_secs(120)),
        }
    }
}

/// Everything the assistant needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub classify: ModelProfile,
    pub general: ModelProfile,
    pub generate: ModelProfile,
    pub summary: ModelProfile,
    pub keep_alive: Option<String>,
    pub dialect: String,
    pub synthesis: SynthesisSettings,
    pub max_rows: usize,
    pub max_tables: usize,
    pub max_hint_chars: usize,
    pub timeouts: Timeouts,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            classify: ModelProfile::new("qwen2.5:0.5b", 16, Some(512)),
            general: ModelProfile::new("qwen2.5:3b", 256, Some(1024)),
            generate: ModelProfile::new("qwen2.5-coder:3b", 256, Some(4096)),
            summary: ModelProfile::new("qwen2.5:3b", 256, Some(1024)),
            keep_alive: Some("30m".to_string()),
            dialect: "SQLite".to_string(),
            synthesis: SynthesisSettings::default(),
            max_rows: DEFAULT_MAX_ROWS,
            max_tables: DEFAULT_MAX_TABLES,
            max_hint_chars: DEFAULT_MAX_CHARS,
            timeouts: Timeouts::default(),
        }
    }
}

/// Pipeline steps, named in logs and deadline errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classify,
    Introspect,
    Generate,
    Sanitize,
    Validate,
    Execute,
    Synthesize,
    LookupDocs,
    Reply,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Introspect => "introspect",
            Stage::Generate => "generate",
            Stage::Sanitize => "sanitize",
            Stage::Validate => "validate",
            Stage::Execute => "execute",
            Stage::Synthesize => "synthesize",
            Stage::LookupDocs => "lookup_docs",
            Stage::Reply => "reply",
        }
    }
}

/// Non-error terminal states.
enum Outcome {
    Answered(String),
    Warning(WarningReason),
}

/// Mutable per-request state: where the request is and what it has learned.
struct Progress {
    stage: Stage,
    detail: CategoryDetail,
}

impl Progress {
    fn enter(&mut self, stage: Stage) {
        tracing::debug!(stage = stage.as_str(), "stage enter");
        self.stage = stage;
    }

    fn set_query(&mut self, query: &str) {
        if let CategoryDetail::QueryRequired {
            generated_query, ..
        } = &mut self.detail
        {
            *generated_query = Some(query.to_string());
        }
    }

    fn set_rows(&mut self, rows: usize) {
        if let CategoryDetail::QueryRequired { row_count, .. } = &mut self.detail {
            *row_count = Some(rows);
        }
    }

    fn set_docs(&mut self, docs: Vec<String>) {
        if let CategoryDetail::Documentation { related_docs } = &mut self.detail {
            *related_docs = docs;
        }
    }
}

pub struct Assistant {
    chat: Arc<dyn ChatModel>,
    store: Arc<dyn DataStore>,
    generator: Arc<dyn QueryGenerator>,
    docs: Arc<dyn DocumentRetriever>,
    classifier: QuestionClassifier,
    introspector: SchemaIntrospector,
    executor: QueryExecutor,
    synthesizer: AnswerSynthesizer,
    general: ModelProfile,
    /// Documentation answers use the summary model.
    docs_answer: ModelProfile,
    keep_alive: Option<String>,
    language: String,
    timeouts: Timeouts,
}

pub struct AssistantBuilder {
    chat: Arc<dyn ChatModel>,
    store: Arc<dyn DataStore>,
    generator: Option<Arc<dyn QueryGenerator>>,
    docs: Option<Arc<dyn DocumentRetriever>>,
    settings: AssistantSettings,
}

impl AssistantBuilder {
    pub fn settings(mut self, settings: AssistantSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the default prompted generator.
    pub fn generator(mut self, generator: Arc<dyn QueryGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn documents(mut self, docs: Arc<dyn DocumentRetriever>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn build(self) -> Assistant {
        let AssistantSettings {
            classify,
            general,
            generate,
            summary,
            keep_alive,
            dialect,
            synthesis,
            max_rows,
            max_tables,
            max_hint_chars,
            timeouts,
        } = self.settings;

        let language = synthesis.language.clone();
        let generator = self.generator.unwrap_or_else(|| {
            Arc::new(PromptedGenerator::new(
                self.chat.clone(),
                generate,
                keep_alive.clone(),
                &dialect,
            ))
        });
        tracing::debug!(generator = generator.name(), "assistant built");
        Assistant {
            classifier: QuestionClassifier::new(classify, keep_alive.clone()),
            introspector: SchemaIntrospector::new(max_tables, max_hint_chars),
            executor: QueryExecutor::new(self.store.clone(), max_rows),
            docs_answer: summary.clone(),
            synthesizer: AnswerSynthesizer::new(
                self.chat.clone(),
                summary,
                keep_alive.clone(),
                synthesis,
            ),
            docs: self.docs.unwrap_or_else(|| Arc::new(NoDocuments)),
            chat: self.chat,
            store: self.store,
            generator,
            general,
            keep_alive,
            language,
            timeouts,
        }
    }
}

impl Assistant {
    pub fn builder(chat: Arc<dyn ChatModel>, store: Arc<dyn DataStore>) -> AssistantBuilder {
        AssistantBuilder {
            chat,
            store,
            generator: None,
            docs: None,
            settings: AssistantSettings::default(),
        }
    }

    pub fn ask(&self, question: &str) -> ResponseEnvelope {
        self.ask_with(question, AskOptions::default())
    }

    /// Answer one question. Never fails: pipeline errors become ERROR
    /// envelopes and their detail goes to the log.
    pub fn ask_with(&self, question: &str, options: AskOptions) -> ResponseEnvelope {
        let deadline = Deadline::start(self.timeouts.request);
        let mut progress = Progress {
            stage: Stage::Classify,
            detail: CategoryDetail::Unclassified,
        };
        let result = self.run(question, options, &deadline, &mut progress);
        let elapsed = deadline.elapsed();

        let envelope = match result {
            Ok(Outcome::Answered(answer)) => {
                ResponseEnvelope::success(question, progress.detail, answer, elapsed)
            }
            Ok(Outcome::Warning(reason)) => {
                ResponseEnvelope::warning(question, progress.detail, reason, elapsed)
            }
            Err(err) => {
                tracing::error!(
                    stage = progress.stage.as_str(),
                    kind = err.kind(),
                    timeout = err.is_timeout(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "request failed"
                );
                // Statements and row counts are not echoed on failures.
                let detail = match progress.detail.category() {
                    Some(category) => CategoryDetail::for_category(category),
                    None => CategoryDetail::Unclassified,
                };
                ResponseEnvelope::error(question, detail, &err, elapsed)
            }
        };
        tracing::info!(
            status = ?envelope.status,
            category = envelope.category().map(|c| c.as_str()).unwrap_or("NONE"),
            row_count = envelope.row_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "request complete"
        );
        envelope
    }

    /// Schema hint the generator would see for `question`.
    pub fn schema_hint(&self, question: &str) -> Result<SchemaHint, PipelineError> {
        self.introspector.build_hint(self.store.as_ref(), question)
    }

    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    fn run(
        &self,
        question: &str,
        options: AskOptions,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<Outcome, PipelineError> {
        progress.enter(Stage::Classify);
        deadline.check(Stage::Classify.as_str())?;
        let category = self.classifier.classify(
            self.chat.as_ref(),
            question,
            deadline.clamp(self.timeouts.llm),
        )?;
        progress.detail = CategoryDetail::for_category(category);
        tracing::info!(%category, "question classified");

        match category {
            QuestionCategory::General => self.reply_general(question, deadline, progress),
            QuestionCategory::Documentation => self.reply_from_docs(question, deadline, progress),
            QuestionCategory::QueryRequired => {
                self.answer_with_query(question, options, deadline, progress)
            }
        }
    }

    fn reply_general(
        &self,
        question: &str,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<Outcome, PipelineError> {
        progress.enter(Stage::Reply);
        let messages = vec![
            ChatMessage::system(prompts::general_prompt(&self.language)),
            ChatMessage::user(question),
        ];
        self.reply(&self.general, messages, deadline)
            .map(Outcome::Answered)
    }

    fn reply_from_docs(
        &self,
        question: &str,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<Outcome, PipelineError> {
        progress.enter(Stage::LookupDocs);
        deadline.check(Stage::LookupDocs.as_str())?;
        let docs = self.docs.related_docs(question)?;
        if docs.is_empty() {
            return Ok(Outcome::Warning(WarningReason::NoDocumentation));
        }
        let messages = vec![
            ChatMessage::system(prompts::documentation_prompt(&self.language)),
            ChatMessage::user(prompts::documentation_input(question, &docs)),
        ];
        progress.set_docs(docs);

        progress.enter(Stage::Reply);
        self.reply(&self.docs_answer, messages, deadline)
            .map(Outcome::Answered)
    }

    fn reply(
        &self,
        profile: &ModelProfile,
        messages: Vec<ChatMessage>,
        deadline: &Deadline,
    ) -> Result<String, PipelineError> {
        deadline.check(Stage::Reply.as_str())?;
        let request = ChatRequest::new(profile, messages, deadline.clamp(self.timeouts.llm))
            .keep_alive(self.keep_alive.as_deref());
        self.chat.chat(&request).map_err(PipelineError::ReplyFailure)
    }

    fn answer_with_query(
        &self,
        question: &str,
        options: AskOptions,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<Outcome, PipelineError> {
        progress.enter(Stage::Introspect);
        let hint = if self.generator.uses_schema_hint() {
            deadline.check(Stage::Introspect.as_str())?;
            self.schema_hint(question)?
        } else {
            SchemaHint::default()
        };

        progress.enter(Stage::Generate);
        deadline.check(Stage::Generate.as_str())?;
        let raw = self
            .generator
            .generate_query(question, &hint, deadline.clamp(self.timeouts.llm))?;
        tracing::debug!(generator = self.generator.name(), raw = %raw, "query generated");

        progress.enter(Stage::Sanitize);
        let sanitized = sanitize(&raw)?;

        progress.enter(Stage::Validate);
        let validated = safety::validate(&sanitized)?;
        if options.include_query {
            progress.set_query(validated.as_str());
        }

        progress.enter(Stage::Execute);
        deadline.check(Stage::Execute.as_str())?;
        let outcome = self
            .executor
            .execute(&validated, deadline.clamp(self.timeouts.query))?;

        let result = match outcome {
            QueryOutcome::Empty => {
                progress.set_rows(0);
                return Ok(Outcome::Warning(WarningReason::NoMatchingData));
            }
            QueryOutcome::Oversized(count) => {
                progress.set_rows(count);
                return Ok(Outcome::Warning(WarningReason::TooManyRows(count)));
            }
            QueryOutcome::Success(result) => result,
        };
        progress.set_rows(result.total_rows);
        if !options.allow_data_in_prompt {
            return Ok(Outcome::Answered(count_only_answer(result.total_rows)));
        }

        progress.enter(Stage::Synthesize);
        match self
            .synthesizer
            .synthesize(question, &result, deadline.clamp(self.timeouts.llm))
        {
            Ok(answer) => Ok(Outcome::Answered(answer)),
            Err(err) => {
                tracing::warn!(error = %err, row_count = result.total_rows, "answer synthesis degraded");
                Ok(Outcome::Answered(count_only_answer(result.total_rows)))
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
