//! Query generation backends.
//!
//! Generation is a single attempt with a bounded output length. Whatever comes
//! back is untrusted text; the sanitizer and safety gate decide what runs.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::lm::{map_ureq_error, ChatMessage, ChatModel, ChatRequest, LmError, ModelProfile};
use crate::prompts;
use crate::schema::SchemaHint;

/// Default JSON-RPC endpoint of the hosted text-to-query service.
pub const DEFAULT_CLOUD_ENDPOINT: &str = "https://ask.vanna.ai/rpc";

/// Turns a question into raw query text.
pub trait QueryGenerator: Send + Sync {
    fn generate_query(
        &self,
        question: &str,
        hint: &SchemaHint,
        timeout: Duration,
    ) -> Result<String, PipelineError>;

    /// Whether the generator reads the schema hint. Generators that already
    /// know the schema let the orchestrator skip introspection.
    fn uses_schema_hint(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Local chat model driven by the generation contract prompt.
pub struct PromptedGenerator {
    model: Arc<dyn ChatModel>,
    profile: ModelProfile,
    keep_alive: Option<String>,
    dialect: String,
}

impl PromptedGenerator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        profile: ModelProfile,
        keep_alive: Option<String>,
        dialect: &str,
    ) -> Self {
        Self {
            model,
            profile,
            keep_alive,
            dialect: dialect.to_string(),
        }
    }
}

impl QueryGenerator for PromptedGenerator {
    fn generate_query(
        &self,
        question: &str,
        hint: &SchemaHint,
        timeout: Duration,
    ) -> Result<String, PipelineError> {
        let prompt = prompts::generation_prompt(&self.dialect, &hint.text, question);
        let request = ChatRequest::new(&self.profile, vec![ChatMessage::user(prompt)], timeout)
            .keep_alive(self.keep_alive.as_deref());
        self.model
            .chat(&request)
            .map_err(PipelineError::GenerationFailure)
    }

    fn name(&self) -> &'static str {
        "prompted"
    }
}

/// Hosted text-to-query service that was trained on the schema out of band.
/// The schema hint is not sent.
pub struct CloudGenerator {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'static str,
    params: [RpcQuestion<'a>; 1],
}

#[derive(Serialize)]
struct RpcQuestion<'a> {
    question: &'a str,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<RpcAnswer>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RpcAnswer {
    sql: Option<String>,
}

impl CloudGenerator {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: endpoint.trim().to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn call(&self, question: &str, timeout: Duration) -> Result<String, LmError> {
        if timeout.is_zero() {
            return Err(LmError::Timeout(timeout));
        }
        let body = RpcRequest {
            method: "generate_sql_from_question",
            params: [RpcQuestion { question }],
        };
        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("Vanna-Key", &self.api_key)
            .header("Vanna-Org", &self.model)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .send_json(&body)
            .map_err(|err| map_ureq_error(err, timeout))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .body_mut()
                .read_to_string()
                .unwrap_or_default();
            return Err(LmError::Http { status, body });
        }
        let parsed: RpcResponse = response
            .body_mut()
            .read_json()
            .map_err(|err| LmError::Protocol(format!("invalid rpc JSON: {err}")))?;
        if let Some(error) = parsed.error {
            return Err(LmError::Protocol(format!("rpc error: {error}")));
        }
        let sql = parsed
            .result
            .and_then(|answer| answer.sql)
            .ok_or_else(|| LmError::Protocol("rpc result has no sql".to_string()))?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = question.len(),
            response_bytes = sql.len(),
            "cloud generate complete"
        );
        Ok(sql)
    }
}

impl QueryGenerator for CloudGenerator {
    fn generate_query(
        &self,
        question: &str,
        _hint: &SchemaHint,
        timeout: Duration,
    ) -> Result<String, PipelineError> {
        self.call(question, timeout)
            .map_err(PipelineError::GenerationFailure)
    }

    fn uses_schema_hint(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "cloud"
    }
}
