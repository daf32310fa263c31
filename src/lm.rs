//! Chat-model collaborators used for classification, generation, and replies.
//!
//! Two backends sit behind [`ChatModel`]:
//!
//! - **Ollama**: the native `/api/chat` endpoint over a shared, pooled
//!   `ureq::Agent`. Model id, token cap, sampling, context window, and the
//!   keep-alive residency hint travel with every request.
//! - **Command**: any local tool that reads a prompt on stdin and prints the
//!   reply on stdout (`llm`, `ollama run`, wrapper scripts). Sampling options
//!   are not forwarded; the tool owns them.
//!
//! Every call carries a timeout. A hung model never blocks a request forever.
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures talking to a chat-model collaborator.
#[derive(Debug, Error)]
pub enum LmError {
    #[error("LM call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("LM http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("LM transport error: {0}")]
    Transport(String),
    #[error("LM response malformed: {0}")]
    Protocol(String),
    #[error("LM command failed: {0}")]
    Command(String),
    #[error("LM io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Tuning for one task (classify, general, generate, summary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelProfile {
    pub model: String,
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_p() -> f32 {
    0.9
}

impl ModelProfile {
    pub fn new(model: &str, max_tokens: u32, num_ctx: Option<u32>) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            temperature: default_temperature(),
            top_p: default_top_p(),
            num_ctx,
        }
    }
}

/// One chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub profile: ModelProfile,
    pub messages: Vec<ChatMessage>,
    pub keep_alive: Option<String>,
    pub timeout: Duration,
}

impl ChatRequest {
    pub fn new(profile: &ModelProfile, messages: Vec<ChatMessage>, timeout: Duration) -> Self {
        Self {
            profile: profile.clone(),
            messages,
            keep_alive: None,
            timeout,
        }
    }

    pub fn keep_alive(mut self, keep_alive: Option<&str>) -> Self {
        self.keep_alive = keep_alive.map(str::to_string);
        self
    }

    fn prompt_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Synchronous chat-style text completion. Implementations must be safe to
/// share across concurrent requests.
pub trait ChatModel: Send + Sync {
    fn chat(&self, request: &ChatRequest) -> Result<String, LmError>;
}

// ============================================================================
// Ollama over HTTP
// ============================================================================

/// Default Ollama host. IPv4 loopback avoids `localhost` resolving to ::1.
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

pub struct OllamaClient {
    agent: ureq::Agent,
    chat_url: String,
}

#[derive(Serialize)]
struct OllamaChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(host: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            chat_url: format!("{}/api/chat", normalize_host(host)),
        }
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

impl ChatModel for OllamaClient {
    fn chat(&self, request: &ChatRequest) -> Result<String, LmError> {
        if request.timeout.is_zero() {
            return Err(LmError::Timeout(request.timeout));
        }
        let body = OllamaChatBody {
            model: &request.profile.model,
            messages: &request.messages,
            stream: false,
            options: OllamaOptions {
                num_predict: request.profile.max_tokens,
                temperature: request.profile.temperature,
                top_p: request.profile.top_p,
                num_ctx: request.profile.num_ctx,
            },
            keep_alive: request.keep_alive.as_deref(),
        };

        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.chat_url)
            .config()
            .timeout_global(Some(request.timeout))
            .build()
            .send_json(&body)
            .map_err(|err| map_ureq_error(err, request.timeout))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .body_mut()
                .read_to_string()
                .unwrap_or_default();
            return Err(LmError::Http { status, body });
        }
        let parsed: OllamaChatResponse = response
            .body_mut()
            .read_json()
            .map_err(|err| LmError::Protocol(format!("invalid chat JSON: {err}")))?;

        tracing::info!(
            model = %request.profile.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.prompt_bytes(),
            response_bytes = parsed.message.content.len(),
            "lm invoke complete"
        );
        Ok(parsed.message.content.trim().to_string())
    }
}

pub(crate) fn map_ureq_error(err: ureq::Error, timeout: Duration) -> LmError {
    match err {
        ureq::Error::Timeout(_) => LmError::Timeout(timeout),
        ureq::Error::StatusCode(status) => LmError::Http {
            status,
            body: String::new(),
        },
        other => LmError::Transport(other.to_string()),
    }
}

// ============================================================================
// Local command
// ============================================================================

/// Runs a user-configured command per call. The argv is parsed with
/// shell-words; a literal `{prompt}` argument is replaced by the prompt,
/// otherwise the prompt is written to stdin.
pub struct CommandClient {
    argv: Vec<String>,
}

impl CommandClient {
    pub fn new(command: &str) -> Result<Self, LmError> {
        let argv = shell_words::split(command)
            .map_err(|err| LmError::Command(format!("parse LM command {command:?}: {err}")))?;
        if argv.is_empty() {
            return Err(LmError::Command("LM command is empty".to_string()));
        }
        Ok(Self { argv })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

/// Flatten chat messages into one prompt for text-in/text-out tools.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role {
            Role::System => prompt.push_str("# Instructions\n"),
            Role::User => prompt.push_str("# Input\n"),
        }
        prompt.push_str(message.content.trim());
        prompt.push_str("\n\n");
    }
    prompt
}

impl ChatModel for CommandClient {
    fn chat(&self, request: &ChatRequest) -> Result<String, LmError> {
        let prompt = render_transcript(&request.messages);
        let mut has_placeholder = false;
        let args: Vec<String> = self.argv[1..]
            .iter()
            .map(|arg| {
                if arg == "{prompt}" {
                    has_placeholder = true;
                    prompt.clone()
                } else {
                    arg.clone()
                }
            })
            .collect();

        let start = Instant::now();
        let mut child = Command::new(self.program())
            .args(&args)
            .stdin(if has_placeholder {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| LmError::Command(format!("spawn {}: {err}", self.program())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes())?;
        }

        let (success, stdout, stderr) = wait_with_timeout(child, request.timeout)?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt.len(),
            response_bytes = stdout.len(),
            "lm invoke complete"
        );
        if !success {
            return Err(LmError::Command(format!(
                "{} exited with failure: {}",
                self.program(),
                stderr.trim()
            )));
        }
        Ok(stdout.trim().to_string())
    }
}

/// Poll the child until it exits or `timeout` elapses; on timeout the child is
/// killed. Output pipes are drained on helper threads so a chatty child
/// cannot fill a pipe and stall.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<(bool, String, String), LmError> {
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LmError::Timeout(timeout));
        }
        thread::sleep(Duration::from_millis(20));
    };

    let stdout = join_reader(stdout_reader)?;
    let stderr = join_reader(stderr_reader)?;
    Ok((status.success(), stdout, stderr))
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        pipe.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    })
}

fn join_reader(
    handle: Option<thread::JoinHandle<std::io::Result<String>>>,
) -> Result<String, LmError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| LmError::Command("output reader panicked".to_string()))?
            .map_err(LmError::Io),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout: Duration) -> ChatRequest {
        ChatRequest::new(
            &ModelProfile::new("test", 16, None),
            vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
            timeout,
        )
    }

    #[test]
    fn transcript_labels_roles() {
        let prompt = render_transcript(&request(Duration::from_secs(1)).messages);
        assert_eq!(prompt, "# Instructions\nbe brief\n\n# Input\nhello\n\n");
    }

    #[test]
    fn normalize_host_adds_scheme_and_trims_slash() {
        assert_eq!(normalize_host("localhost:11434/"), "http://localhost:11434");
        assert_eq!(normalize_host("https://lm.internal"), "https://lm.internal");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandClient::new("   ").is_err());
        let client = CommandClient::new("llm -m 'small model'").unwrap();
        assert_eq!(client.program(), "llm");
        assert_eq!(client.argv[2], "small model");
    }

    #[cfg(unix)]
    #[test]
    fn command_client_echoes_stdin() {
        let client = CommandClient::new("cat").unwrap();
        let reply = client.chat(&request(Duration::from_secs(10))).unwrap();
        assert!(reply.contains("# Input\nhello"));
    }

    #[cfg(unix)]
    #[test]
    fn command_client_times_out() {
        let client = CommandClient::new("sleep 5").unwrap();
        let err = client.chat(&request(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, LmError::Timeout(_)));
    }

    #[test]
    fn ollama_zero_timeout_short_circuits() {
        let client = OllamaClient::new("127.0.0.1:9");
        let err = client.chat(&request(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, LmError::Timeout(_)));
    }
}
