//! Self-hosted provider speaking the Ollama `/api/chat` protocol.
//!
//! With `stream: true` the server answers with newline-delimited JSON objects,
//! each carrying `message.content`; the final object has `done: true`.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use super::{FragmentStream, ProviderError, TextGenerator, chat_messages, http_agent, map_http_error};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OllamaModel {
    DolphinLlama3,
    Llama3Instruct8b,
    Llama3Instruct70b,
}

impl OllamaModel {
    pub const ALL: [OllamaModel; 3] = [
        Self::DolphinLlama3,
        Self::Llama3Instruct8b,
        Self::Llama3Instruct70b,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DolphinLlama3 => "dolphin-llama3:8b-v2.9-q5_K_M",
            Self::Llama3Instruct8b => "llama3:8b-instruct-fp16",
            Self::Llama3Instruct70b => "llama3:70b-instruct-q5_K_M",
        }
    }

    pub fn is_known(name: &str) -> bool {
        Self::ALL.iter().any(|m| m.as_str() == name)
    }
}

pub struct OllamaProvider {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    system_prompt: String,
    label: String,
}

impl OllamaProvider {
    pub fn new(host: &str, model: &str, system_prompt: String, timeout: Duration) -> Self {
        if !OllamaModel::is_known(model) {
            debug!(model, "model is not in the known catalog; passing it through");
        }
        Self {
            agent: http_agent(timeout),
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.to_string(),
            system_prompt,
            label: format!("ollama:{model}"),
        }
    }
}

impl TextGenerator for OllamaProvider {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate_text(&self, prompt: &str) -> Result<FragmentStream, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": chat_messages(&self.system_prompt, prompt),
            "stream": true,
            "options": {},
        });

        debug!(endpoint = %self.endpoint, prompt_len = prompt.len(), "starting chat stream");
        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(body)
            .map_err(map_http_error)?;

        Ok(Box::new(NdjsonFragments {
            reader: Some(BufReader::new(response.into_reader())),
        }))
    }
}

/// Iterator over `message.content` of an NDJSON chat stream.
pub struct NdjsonFragments<R: BufRead> {
    reader: Option<R>,
}

impl<R: BufRead> NdjsonFragments<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }
}

impl<R: BufRead> Iterator for NdjsonFragments<R> {
    type Item = Result<String, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            let mut line = String::new();
            let read = match reader.read_line(&mut line) {
                Ok(n) => n,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(ProviderError::Read(e)));
                }
            };
            if read == 0 {
                self.reader = None;
                return None;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(ProviderError::Malformed(format!("{e}: {line}"))));
                }
            };

            if let Some(error) = value.get("error") {
                self.reader = None;
                let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
                return Some(Err(ProviderError::Upstream(message)));
            }

            let content = value
                .pointer("/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if value.get("done").and_then(Value::as_bool).unwrap_or(false) {
                self.reader = None;
            }
            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
    }
}

impl<R: BufRead> Drop for NdjsonFragments<R> {
    fn drop(&mut self) {
        if self.reader.take().is_some() {
            debug!("aborting chat stream");
        }
    }
}
