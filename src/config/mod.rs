pub mod render;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::context::DEFAULT_WINDOW;
use crate::detector::{DEFAULT_PROMPT_PATTERN, PromptDetector};
use crate::provider::DEFAULT_SYSTEM_PROMPT;
use crate::session::{DEFAULT_COLS, DEFAULT_ROWS, SpawnConfig};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".logos";

#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Openai,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "ollama" => Ok(Self::Ollama),
            other => anyhow::bail!("unknown provider '{other}' (expected openai or ollama)"),
        }
    }
}

fn default_program() -> String {
    "/bin/bash".to_string()
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

fn default_context_window() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_WINDOW).unwrap_or(NonZeroUsize::MIN)
}

fn default_record_injected_input() -> bool {
    true
}

fn default_prompt_pattern() -> String {
    DEFAULT_PROMPT_PATTERN.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_base_url() -> String {
    crate::provider::openai::DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_ollama_host() -> String {
    crate::provider::ollama::DEFAULT_HOST.to_string()
}

fn default_ollama_model() -> String {
    "llama3:70b-instruct-q5_K_M".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from(".logos/logs/console.jsonl")
}

/// The console process and the agent's view of it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Characters of transcript kept as generation context.
    #[serde(default = "default_context_window")]
    pub context_window: NonZeroUsize,
    /// Append injected fragments to the context as well as PTY output.
    #[serde(default = "default_record_injected_input")]
    pub record_injected_input: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: vec![],
            work_dir: None,
            env: vec![],
            cols: default_cols(),
            rows: default_rows(),
            context_window: default_context_window(),
            record_injected_input: default_record_injected_input(),
        }
    }
}

impl SessionSettings {
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            program: self.program.clone(),
            args: self.args.clone(),
            work_dir: self.work_dir.clone(),
            env: self.env.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }
}

/// Idle-prompt recognition.
///
/// ```toml
/// [prompt]
/// session_token = "logos_ab12"   # exact container hostname, takes precedence
/// pattern = 'root@logos_[a-z0-9]+:\S+ \$ '
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptSettings {
    #[serde(default = "default_prompt_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            pattern: default_prompt_pattern(),
            session_token: None,
        }
    }
}

impl PromptSettings {
    pub fn detector(&self) -> Result<PromptDetector> {
        match &self.session_token {
            Some(token) => Ok(PromptDetector::for_session(token)),
            None => PromptDetector::new(&self.pattern).context("invalid [prompt] pattern"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiSettings {
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: default_openai_model(),
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Inline system prompt; overridden by `system_prompt_file`.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    /// Read timeout for a streaming response, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub openai: OpenAiSettings,
    #[serde(default)]
    pub ollama: OllamaSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            system_prompt: None,
            system_prompt_file: None,
            timeout_secs: default_timeout_secs(),
            openai: OpenAiSettings::default(),
            ollama: OllamaSettings::default(),
        }
    }
}

impl ProviderSettings {
    /// File, then inline text, then the built-in instructions.
    pub fn resolve_system_prompt(&self) -> Result<String> {
        if let Some(path) = &self.system_prompt_file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("failed to read system prompt {}", path.display()));
        }
        Ok(self
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()))
    }

    /// Model name of the selected provider.
    pub fn model(&self) -> &str {
        match self.kind {
            ProviderKind::Openai => &self.openai.model,
            ProviderKind::Ollama => &self.ollama.model,
        }
    }

    pub fn set_model(&mut self, model: String) {
        match self.kind {
            ProviderKind::Openai => self.openai.model = model,
            ProviderKind::Ollama => self.ollama.model = model,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSettings {
    /// JSONL execution log; relative paths resolve against the config root.
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub prompt: PromptSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.logos/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Where the execution log goes: relative paths hang off the directory
    /// holding `.logos/`, or `fallback_root` when no config file was found.
    pub fn log_path(&self, config_path: Option<&Path>, fallback_root: &Path) -> PathBuf {
        if self.log.path.is_absolute() {
            return self.log.path.clone();
        }
        let root = config_path
            .and_then(|p| p.parent())
            .and_then(|dot_dir| dot_dir.parent())
            .unwrap_or(fallback_root);
        root.join(&self.log.path)
    }
}
