//! Text generation providers.
//!
//! A provider turns a prompt into a lazy stream of text fragments. Every call
//! is an independent streaming request carrying two messages: the configured
//! system prompt and the prompt itself as the user message. The console agent
//! only sees the [`TextGenerator`] trait; which backend answers is decided by
//! configuration.

pub mod ollama;
pub mod openai;

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{ProviderKind, ProviderSettings};

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Ordered fragments of one generation. Dropping the stream ends the request.
pub type FragmentStream = Box<dyn Iterator<Item = Result<String, ProviderError>> + Send>;

/// Default operating instructions for a shell-driving model.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
# You are an AI agent connected to a real Linux terminal with a bash shell.
# Everything you write is typed directly into that shell.
#
# Important:
# - Use only basic shell commands (cd, ls, cat, echo)
# - Never use multi-line shell commands. Only use one-liners.
# - Avoid any command that could get the terminal stuck. You cannot use modifier
#   keys, so never run anything that needs ctrl-d or ctrl-c to finish
# - Do not use text editors or commands requiring modifier keys
# - Write all non-command text as shell comments (preceded by #)
# - Do NOT use markdown formatting or code blocks
# - Use cat with heredoc to create or append to files
# - Verify that files exist with ls before reading them, and obey its output
#
# Example of using cat with heredoc to append to notes.txt:
# cat << EOF >> notes.txt
# Your text here
# EOF
#
# Finish every command with a carriage return so the shell executes it.
";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API key not found: set the {0} environment variable")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("failed to read response stream: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed stream chunk: {0}")]
    Malformed(String),
    #[error("provider reported an error: {0}")]
    Upstream(String),
}

/// Capability shared by all generation backends.
pub trait TextGenerator: Send + Sync {
    /// Short label used in logs (e.g. "openai:gpt-4o").
    fn name(&self) -> &str;

    /// Start a streaming generation for `prompt`.
    fn generate_text(&self, prompt: &str) -> Result<FragmentStream, ProviderError>;
}

/// One role-tagged chat message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// The two-message conversation every request carries.
pub fn chat_messages(system_prompt: &str, prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: system_prompt.to_string(),
        },
        ChatMessage {
            role: "user",
            content: prompt.to_string(),
        },
    ]
}

pub(crate) fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(timeout)
        .build()
}

pub(crate) fn map_http_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            ProviderError::Status {
                code,
                body: preview(&body, 300),
            }
        }
        ureq::Error::Transport(transport) => ProviderError::Transport(transport.to_string()),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max_chars {
        compact
    } else {
        let mut out: String = compact.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// Build the configured provider.
pub fn provider_from_config(settings: &ProviderSettings) -> Result<Box<dyn TextGenerator>> {
    let system_prompt = settings.resolve_system_prompt()?;
    let timeout = Duration::from_secs(settings.timeout_secs);

    match settings.kind {
        ProviderKind::Openai => {
            let env_var = &settings.openai.api_key_env;
            let api_key = std::env::var(env_var)
                .map_err(|_| ProviderError::MissingApiKey(env_var.clone()))
                .context("failed to configure OpenAI provider")?;
            info!(model = %settings.openai.model, "using hosted chat completions provider");
            Ok(Box::new(OpenAiProvider::new(
                &settings.openai.base_url,
                api_key,
                &settings.openai.model,
                system_prompt,
                timeout,
            )))
        }
        ProviderKind::Ollama => {
            info!(
                model = %settings.ollama.model,
                host = %settings.ollama.host,
                "using self-hosted Ollama provider"
            );
            Ok(Box::new(OllamaProvider::new(
                &settings.ollama.host,
                &settings.ollama.model,
                system_prompt,
                timeout,
            )))
        }
    }
}
