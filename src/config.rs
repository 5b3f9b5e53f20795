//! Bridge configuration, loaded from TOML.
//!
//! Every field has a default, so an empty or missing file yields a working
//! setup against a local Ollama and `policy.pl` in the current directory.
//! Lookup order for the file: explicit path, `$POLICY_BRIDGE_CONFIG`,
//! `./policy-bridge.toml`. `POLICY_BRIDGE_BIND` and `POLICY_BRIDGE_PORT`
//! override the listener afterwards.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SchemaResult;
use crate::kb::facts::FactBase;
use crate::kb::swipl::{SwiplConfig, SwiplEngine};
use crate::kb::{KbResult, KnowledgeBase};
use crate::llm::LlmConfig;
use crate::schema::SchemaRegistry;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "POLICY_BRIDGE_CONFIG";
/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "policy-bridge.toml";

pub const BUILTIN_NLU_PROMPT: &str = include_str!("../prompts/nlu.txt");
pub const BUILTIN_NLG_PROMPT: &str = include_str!("../prompts/nlg.txt");

/// Errors from loading configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(bridge::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(bridge::config::parse),
        help("Check the TOML syntax and field names against policy-bridge.toml.")
    )]
    Parse { path: String, message: String },

    #[error("environment variable {var} has invalid value \"{value}\"")]
    #[diagnostic(
        code(bridge::config::env),
        help("POLICY_BRIDGE_PORT must be a port number between 0 and 65535.")
    )]
    InvalidEnv { var: String, value: String },

    #[error("failed to read prompt file: {path}")]
    #[diagnostic(
        code(bridge::config::prompt),
        help("Fix the path under [prompts] or remove it to use the built-in prompt.")
    )]
    Prompt {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub prompts: PromptConfig,
    pub kb: KbConfig,
    pub schema: SchemaConfig,
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Deadline for one chat request, end to end.
    pub request_timeout_secs: u64,
    pub welcome_message: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            request_timeout_secs: 120,
            welcome_message:
                "Welcome to SSENSE support. How can I help you with your returns questions today?"
                    .into(),
        }
    }
}

/// `[prompts]`: optional overrides for the built-in system prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub nlu: Option<PathBuf>,
    pub nlg: Option<PathBuf>,
}

impl PromptConfig {
    /// System prompt for the understanding step.
    pub fn nlu_prompt(&self) -> ConfigResult<String> {
        read_prompt(self.nlu.as_deref(), BUILTIN_NLU_PROMPT)
    }

    /// System prompt for the rendering step.
    pub fn nlg_prompt(&self) -> ConfigResult<String> {
        read_prompt(self.nlg.as_deref(), BUILTIN_NLG_PROMPT)
    }
}

fn read_prompt(path: Option<&Path>, builtin: &str) -> ConfigResult<String> {
    match path {
        None => Ok(builtin.to_string()),
        Some(p) => std::fs::read_to_string(p).map_err(|source| ConfigError::Prompt {
            path: p.display().to_string(),
            source,
        }),
    }
}

/// Which knowledge-base backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KbBackend {
    Swipl,
    Facts,
}

/// `[kb]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KbConfig {
    pub backend: KbBackend,
    /// Prolog source for the `swipl` backend.
    pub rule_file: PathBuf,
    /// Fact table for the `facts` backend.
    pub facts_file: PathBuf,
    pub swipl_path: PathBuf,
    /// Per-query deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            backend: KbBackend::Swipl,
            rule_file: PathBuf::from("policy.pl"),
            facts_file: PathBuf::from("data/policy.facts.toml"),
            swipl_path: PathBuf::from("swipl"),
            timeout_secs: 10,
        }
    }
}

impl KbConfig {
    /// Construct the configured backend.
    pub fn open(&self) -> KbResult<Box<dyn KnowledgeBase>> {
        match self.backend {
            KbBackend::Swipl => Ok(Box::new(SwiplEngine::new(SwiplConfig {
                executable: self.swipl_path.clone(),
                rule_file: self.rule_file.clone(),
                timeout_secs: self.timeout_secs,
            })?)),
            KbBackend::Facts => {
                let facts = FactBase::from_toml_file(&self.facts_file)?;
                tracing::info!(
                    path = %self.facts_file.display(),
                    facts = facts.len(),
                    "fact backend loaded"
                );
                Ok(Box::new(facts))
            }
        }
    }
}

/// `[schema]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Predicate table to use instead of the built-in one.
    pub path: Option<PathBuf>,
}

impl SchemaConfig {
    pub fn load(&self) -> SchemaResult<SchemaRegistry> {
        match &self.path {
            Some(p) => SchemaRegistry::from_toml_file(p),
            None => SchemaRegistry::builtin(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Resolve and load the config file, then apply environment overrides.
    ///
    /// An explicit path or `$POLICY_BRIDGE_CONFIG` must exist; the default
    /// file is optional.
    pub fn discover(explicit: Option<&Path>) -> ConfigResult<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading config");
                Self::load(&path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                tracing::info!(path = DEFAULT_CONFIG_FILE, "loading config");
                Self::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                tracing::info!("no config file, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `POLICY_BRIDGE_BIND` / `POLICY_BRIDGE_PORT` from `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        if let Some(bind) = lookup("POLICY_BRIDGE_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("POLICY_BRIDGE_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "POLICY_BRIDGE_PORT".into(),
                value: port,
            })?;
        }
        Ok(())
    }

    /// Serialize back to TOML (used by `policy-bridge config`).
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: "<generated>".into(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.kb.backend, KbBackend::Swipl);
        assert_eq!(config.llm.provider, Provider::Ollama);
        assert!(config.schema.path.is_none());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [server]
            port = 8080

            [llm]
            provider = "openai"
            model = "gpt-4o"

            [kb]
            backend = "facts"
            facts_file = "demo.toml"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.llm.provider, Provider::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.nlu_temperature, 0.1);
        assert_eq!(config.kb.backend, KbBackend::Facts);
        assert_eq!(config.kb.facts_file, PathBuf::from("demo.toml"));
        assert_eq!(config.kb.timeout_secs, 10);
    }

    #[test]
    fn unknown_backend_rejected() {
        let err = BridgeConfig::from_toml_str("[kb]\nbackend = \"datalog\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides() {
        let mut config = BridgeConfig::default();
        config
            .apply_env_overrides(|var| match var {
                "POLICY_BRIDGE_BIND" => Some("127.0.0.1".into()),
                "POLICY_BRIDGE_PORT" => Some("9000".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9000);

        let err = config
            .apply_env_overrides(|var| (var == "POLICY_BRIDGE_PORT").then(|| "http".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy-bridge.toml");
        let mut config = BridgeConfig::default();
        config.server.port = 7070;
        config.kb.backend = KbBackend::Facts;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 7070);
        assert_eq!(loaded.kb.backend, KbBackend::Facts);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = BridgeConfig::load(Path::new("/nonexistent/policy-bridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn builtin_prompts_and_overrides() {
        let prompts = PromptConfig::default();
        assert!(prompts.nlu_prompt().unwrap().contains("\"status\""));
        assert!(!prompts.nlg_prompt().unwrap().is_empty());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nlu.txt");
        std::fs::write(&path, "custom prompt").unwrap();
        let prompts = PromptConfig {
            nlu: Some(path),
            nlg: Some(dir.path().join("missing.txt")),
        };
        assert_eq!(prompts.nlu_prompt().unwrap(), "custom prompt");
        assert!(matches!(
            prompts.nlg_prompt().unwrap_err(),
            ConfigError::Prompt { .. }
        ));
    }

    #[test]
    fn facts_backend_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("facts.toml");
        std::fs::write(&path, "[[fact]]\npredicate = \"get_return_window\"\nargs = [30]\n")
            .unwrap();
        let kb = KbConfig {
            backend: KbBackend::Facts,
            facts_file: path,
            ..Default::default()
        }
        .open()
        .unwrap();
        assert_eq!(kb.name(), "facts");
    }
}
