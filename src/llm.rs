//! Text-completion client for the understanding and rendering steps.
//!
//! The LLM is used **only** for:
//! - Turning a user question into a JSON intent (understanding)
//! - Phrasing an already-computed knowledge-base result (rendering)
//!
//! It never decides the answer itself; that is the knowledge base's job.
//! Two wire formats are supported: Ollama's `/api/chat` and the
//! OpenAI-compatible `/v1/chat/completions`.

use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the LLM subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("LLM endpoint is not available at {url}")]
    #[diagnostic(
        code(bridge::llm::unavailable),
        help("Start the model server (e.g. `ollama serve`) or fix `llm.base_url`.")
    )]
    Unavailable { url: String },

    #[error("LLM request failed: {message}")]
    #[diagnostic(
        code(bridge::llm::request_failed),
        help("Check that the model server is running and the model is available.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse LLM response: {message}")]
    #[diagnostic(
        code(bridge::llm::parse_error),
        help("The model server returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("LLM request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(bridge::llm::timeout),
        help("Increase `llm.timeout_secs` or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },

    #[error("API key variable {var} is not set")]
    #[diagnostic(
        code(bridge::llm::missing_api_key),
        help("Export {var} (or put it in .env) before starting, or switch `llm.provider` to ollama.")
    )]
    MissingApiKey { var: String },
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Wire format of the completion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

/// Configuration for the completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Base URL, without the endpoint path.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token (OpenAI-compatible only).
    pub api_key_env: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature for the understanding step.
    pub nlu_temperature: f32,
    /// Sampling temperature for the rendering step.
    pub nlg_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 60,
            nlu_temperature: 0.1,
            nlg_temperature: 0.3,
        }
    }
}

/// One completion call: a system instruction plus a single user turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    /// Ask the server to constrain output to a JSON object.
    pub json: bool,
}

/// Anything that can complete a prompt. Implemented by [`ChatClient`] and by
/// scripted fakes in tests.
pub trait Completion: Send + Sync {
    fn complete(&self, request: &CompletionRequest<'_>) -> LlmResult<String>;
}

/// Blocking HTTP client for the completion endpoint.
pub struct ChatClient {
    config: LlmConfig,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl ChatClient {
    /// Create a client. For the OpenAI-compatible provider the API key is read
    /// from the configured environment variable now, not per request.
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let api_key = match config.provider {
            Provider::Ollama => None,
            Provider::OpenAi => Some(std::env::var(&config.api_key_env).map_err(|_| {
                LlmError::MissingApiKey {
                    var: config.api_key_env.clone(),
                }
            })?),
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Ok(Self {
            config,
            api_key,
            agent,
        })
    }

    /// Probe the server with a lightweight request.
    pub fn probe(&self) -> bool {
        let url = match self.config.provider {
            Provider::Ollama => format!("{}/api/tags", self.config.base_url),
            Provider::OpenAi => format!("{}/v1/models", self.config.base_url),
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        let mut request = agent.get(&url);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        matches!(request.call(), Ok(resp) if resp.status() == 200)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        match self.config.provider {
            Provider::Ollama => format!("{}/api/chat", self.config.base_url),
            Provider::OpenAi => format!("{}/v1/chat/completions", self.config.base_url),
        }
    }

    fn request_body(&self, request: &CompletionRequest<'_>) -> serde_json::Value {
        let messages = serde_json::json!([
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ]);
        match self.config.provider {
            Provider::Ollama => {
                let mut body = serde_json::json!({
                    "model": self.config.model,
                    "messages": messages,
                    "stream": false,
                    "options": { "temperature": request.temperature },
                });
                if request.json {
                    body["format"] = serde_json::Value::String("json".into());
                }
                body
            }
            Provider::OpenAi => {
                let mut body = serde_json::json!({
                    "model": self.config.model,
                    "messages": messages,
                    "temperature": request.temperature,
                });
                if request.json {
                    body["response_format"] = serde_json::json!({ "type": "json_object" });
                }
                body
            }
        }
    }

    fn extract_content(&self, json: &serde_json::Value) -> LlmResult<String> {
        let content = match self.config.provider {
            Provider::Ollama => json["message"]["content"].as_str(),
            Provider::OpenAi => json["choices"][0]["message"]["content"].as_str(),
        };
        content
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::ParseError {
                message: "missing message content".into(),
            })
    }

    fn classify(&self, err: ureq::Error) -> LlmError {
        match err {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                LlmError::RequestFailed {
                    message: format!("server returned status {code}: {}", body.trim()),
                }
            }
            ureq::Error::Transport(t) => {
                if is_timeout(&t) {
                    LlmError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    }
                } else if matches!(
                    t.kind(),
                    ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns
                ) {
                    LlmError::Unavailable {
                        url: self.config.base_url.clone(),
                    }
                } else {
                    LlmError::RequestFailed {
                        message: t.to_string(),
                    }
                }
            }
        }
    }
}

impl Completion for ChatClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> LlmResult<String> {
        let body = self.request_body(request);
        let mut call = self
            .agent
            .post(&self.endpoint())
            .set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            call = call.set("Authorization", &format!("Bearer {key}"));
        }

        let resp = call.send_json(body).map_err(|e| self.classify(e))?;
        let json: serde_json::Value = resp.into_json().map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                LlmError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                }
            } else {
                LlmError::ParseError {
                    message: e.to_string(),
                }
            }
        })?;
        self.extract_content(&json)
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.config.provider)
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
