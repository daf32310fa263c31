//! Runtime configuration.
//!
//! Config is a JSON file resolved from `--config`, then `BIZQ_CONFIG`, then
//! `<config_dir>/bizq/config.json`; with none of those present the built-in
//! defaults apply. A handful of environment variables override individual
//! fields after loading.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::docs::{DirectoryDocuments, DocumentRetriever, NoDocuments};
use crate::execute::DEFAULT_MAX_ROWS;
use crate::generate::{CloudGenerator, QueryGenerator, DEFAULT_CLOUD_ENDPOINT};
use crate::lm::{ChatModel, CommandClient, ModelProfile, OllamaClient, DEFAULT_OLLAMA_HOST};
use crate::pipeline::{Assistant, AssistantSettings, Timeouts};
use crate::schema::{DEFAULT_MAX_CHARS, DEFAULT_MAX_TABLES};
use crate::store::{SqliteStore, DEFAULT_POOL_SIZE};
use crate::synthesize::{SynthesisSettings, DEFAULT_NOISE_COLUMNS, DEFAULT_SAMPLE_ROWS};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "BIZQ_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub schema_hint: SchemaHintConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub read_pool_size: usize,
    pub query_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shop.db"),
            read_pool_size: DEFAULT_POOL_SIZE,
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmBackend {
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
    },
    /// Local tool reading the prompt on stdin.
    Command { command: String },
}

impl Default for LlmBackend {
    fn default() -> Self {
        LlmBackend::Ollama {
            host: default_ollama_host(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
    pub timeout_secs: u64,
    pub classify: ModelProfile,
    pub general: ModelProfile,
    pub generate: ModelProfile,
    pub summary: ModelProfile,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let settings = AssistantSettings::default();
        Self {
            backend: LlmBackend::default(),
            keep_alive: settings.keep_alive,
            timeout_secs: default_llm_timeout_secs(),
            classify: settings.classify,
            general: settings.general,
            generate: settings.generate,
            summary: settings.summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorConfig {
    /// Local chat model with the schema hint inline.
    #[default]
    Prompted,
    /// Hosted text-to-query service trained on the schema.
    Cloud {
        #[serde(default = "default_cloud_endpoint")]
        endpoint: String,
        model: String,
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaHintConfig {
    pub max_tables: usize,
    pub max_chars: usize,
}

impl Default for SchemaHintConfig {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnswerConfig {
    pub language: String,
    pub currency: String,
    /// Query dialect named in the generation prompt.
    pub dialect: String,
    pub sample_rows: usize,
    pub max_rows: usize,
    pub noise_columns: Vec<String>,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            currency: "USD".to_string(),
            dialect: "SQLite".to_string(),
            sample_rows: DEFAULT_SAMPLE_ROWS,
            max_rows: DEFAULT_MAX_ROWS,
            noise_columns: DEFAULT_NOISE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DocsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> Option<u64> {
    Some(120)
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

fn default_cloud_endpoint() -> String {
    DEFAULT_CLOUD_ENDPOINT.to_string()
}

fn default_api_key_env() -> String {
    "VANNA_API_KEY".to_string()
}

pub fn default_config() -> Config {
    Config {
        schema_version: CONFIG_SCHEMA_VERSION,
        database: DatabaseConfig::default(),
        llm: LlmConfig::default(),
        generator: GeneratorConfig::default(),
        schema_hint: SchemaHintConfig::default(),
        answer: AnswerConfig::default(),
        docs: DocsConfig::default(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

/// Pretty JSON of the defaults, for `config --print-default`.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

/// Config file to read: explicit flag, then env var, then the per-user file
/// when it exists.
pub fn resolve_config_path(flag: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = flag {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("bizq").join("config.json"))
        .filter(|path| path.is_file())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: Config = serde_json::from_slice(&bytes).context("parse config JSON")?;
    Ok(config)
}

/// Resolve, load, apply environment overrides, and validate.
pub fn load(flag: Option<&Path>) -> Result<Config> {
    let mut config = match resolve_config_path(flag) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config(&path)?
        }
        None => default_config(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply `BIZQ_DB_PATH`, `OLLAMA_HOST`, `BIZQ_LM_COMMAND`, and
/// `BIZQ_LLM_TIMEOUT_SECS`. `env` looks a variable up by name.
pub fn apply_env_overrides(
    config: &mut Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let lookup = |name: &str| env(name).filter(|value| !value.trim().is_empty());
    if let Some(path) = lookup("BIZQ_DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(command) = lookup("BIZQ_LM_COMMAND") {
        config.llm.backend = LlmBackend::Command { command };
    } else if let Some(host) = lookup("OLLAMA_HOST") {
        if let LlmBackend::Ollama { host: current } = &mut config.llm.backend {
            *current = host;
        }
    }
    if let Some(secs) = lookup("BIZQ_LLM_TIMEOUT_SECS") {
        config.llm.timeout_secs = secs
            .trim()
            .parse()
            .with_context(|| format!("parse BIZQ_LLM_TIMEOUT_SECS {secs:?}"))?;
    }
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.database.path.as_os_str().is_empty() {
        return Err(anyhow!("database.path must be non-empty"));
    }
    if config.database.read_pool_size == 0 {
        return Err(anyhow!("database.read_pool_size must be at least 1"));
    }
    if config.database.query_timeout_ms == 0 {
        return Err(anyhow!("database.query_timeout_ms must be positive"));
    }
    if config.llm.timeout_secs == 0 {
        return Err(anyhow!("llm.timeout_secs must be positive"));
    }
    if config.request_timeout_secs == Some(0) {
        return Err(anyhow!("request_timeout_secs must be positive when set"));
    }
    for (label, profile) in [
        ("classify", &config.llm.classify),
        ("general", &config.llm.general),
        ("generate", &config.llm.generate),
        ("summary", &config.llm.summary),
    ] {
        if profile.model.trim().is_empty() {
            return Err(anyhow!("llm.{label}.model must be non-empty"));
        }
        if profile.max_tokens == 0 {
            return Err(anyhow!("llm.{label}.max_tokens must be positive"));
        }
    }
    if config.schema_hint.max_tables == 0 || config.schema_hint.max_chars == 0 {
        return Err(anyhow!("schema_hint budgets must be positive"));
    }
    if config.answer.sample_rows == 0 || config.answer.max_rows == 0 {
        return Err(anyhow!("answer.sample_rows and answer.max_rows must be positive"));
    }
    if let LlmBackend::Command { command } = &config.llm.backend {
        let client = CommandClient::new(command).map_err(|err| anyhow!("llm.backend: {err}"))?;
        which::which(client.program())
            .with_context(|| format!("LM command {:?} not found on PATH", client.program()))?;
    }
    if let GeneratorConfig::Cloud { model, .. } = &config.generator {
        if model.trim().is_empty() {
            return Err(anyhow!("generator.model must be non-empty"));
        }
    }
    Ok(())
}

impl Config {
    pub fn assistant_settings(&self) -> AssistantSettings {
        AssistantSettings {
            classify: self.llm.classify.clone(),
            general: self.llm.general.clone(),
            generate: self.llm.generate.clone(),
            summary: self.llm.summary.clone(),
            keep_alive: self.llm.keep_alive.clone(),
            dialect: self.answer.dialect.clone(),
            synthesis: SynthesisSettings {
                language: self.answer.language.clone(),
                currency: self.answer.currency.clone(),
                sample_rows: self.answer.sample_rows,
                noise_columns: self.answer.noise_columns.clone(),
            },
            max_rows: self.answer.max_rows,
            max_tables: self.schema_hint.max_tables,
            max_hint_chars: self.schema_hint.max_chars,
            timeouts: Timeouts {
                llm: Duration::from_secs(self.llm.timeout_secs),
                query: Duration::from_millis(self.database.query_timeout_ms),
                request: self.request_timeout_secs.map(Duration::from_secs),
            },
        }
    }
}

pub fn build_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(match &config.backend {
        LlmBackend::Ollama { host } => Arc::new(OllamaClient::new(host)),
        LlmBackend::Command { command } => {
            Arc::new(CommandClient::new(command).map_err(|err| anyhow!("llm.backend: {err}"))?)
        }
    })
}

/// `None` selects the default prompted generator.
pub fn build_generator(config: &GeneratorConfig) -> Result<Option<Arc<dyn QueryGenerator>>> {
    match config {
        GeneratorConfig::Prompted => Ok(None),
        GeneratorConfig::Cloud {
            endpoint,
            model,
            api_key_env,
        } => {
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("read cloud generator key from {api_key_env}"))?;
            Ok(Some(Arc::new(CloudGenerator::new(endpoint, &api_key, model))))
        }
    }
}

pub fn build_documents(config: &DocsConfig) -> Result<Arc<dyn DocumentRetriever>> {
    Ok(match &config.dir {
        Some(dir) => {
            let docs = DirectoryDocuments::load(dir)
                .with_context(|| format!("load documents from {}", dir.display()))?;
            if docs.is_empty() {
                tracing::warn!(dir = %dir.display(), "documentation directory has no passages");
            }
            Arc::new(docs)
        }
        None => Arc::new(NoDocuments),
    })
}

/// Open every collaborator named by the config and wire the assistant.
pub fn build_assistant(config: &Config) -> Result<Assistant> {
    let store = SqliteStore::open(&config.database.path, config.database.read_pool_size)
        .with_context(|| format!("open database {}", config.database.path.display()))?;
    tracing::debug!(pool_size = store.pool_size(), "database ready");
    let chat = build_chat_model(&config.llm)?;
    let mut builder = Assistant::builder(chat, Arc::new(store))
        .settings(config.assistant_settings())
        .documents(build_documents(&config.docs)?);
    if let Some(generator) = build_generator(&config.generator)? {
        builder = builder.generator(generator);
    }
    Ok(builder.build())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
