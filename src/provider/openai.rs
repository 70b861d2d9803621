//! Hosted chat-completions provider (OpenAI-compatible streaming API).
//!
//! The response is a server-sent-event stream: `data: {chunk}` lines carrying
//! `choices[0].delta.content`, terminated by `data: [DONE]`. The stream owns
//! the HTTP response body; dropping it before `[DONE]` aborts the request.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use super::{FragmentStream, ProviderError, TextGenerator, chat_messages, http_agent, map_http_error};

/// Known hosted model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiModel {
    Gpt4o,
    Gpt4Turbo,
    Gpt35Turbo,
}

impl OpenAiModel {
    pub const ALL: [OpenAiModel; 3] = [Self::Gpt4o, Self::Gpt4Turbo, Self::Gpt35Turbo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4o => "gpt-4o",
            Self::Gpt4Turbo => "gpt-4-turbo",
            Self::Gpt35Turbo => "gpt-3.5-turbo",
        }
    }

    pub fn is_known(name: &str) -> bool {
        Self::ALL.iter().any(|m| m.as_str() == name)
    }
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    label: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        system_prompt: String,
        timeout: Duration,
    ) -> Self {
        if !OpenAiModel::is_known(model) {
            debug!(model, "model is not in the known catalog; passing it through");
        }
        Self {
            agent: http_agent(timeout),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            system_prompt,
            label: format!("openai:{model}"),
        }
    }
}

impl TextGenerator for OpenAiProvider {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate_text(&self, prompt: &str) -> Result<FragmentStream, ProviderError> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": chat_messages(&self.system_prompt, prompt),
        });

        debug!(endpoint = %self.endpoint, prompt_len = prompt.len(), "starting completion stream");
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Accept", "text/event-stream")
            .send_json(body)
            .map_err(map_http_error)?;

        Ok(Box::new(SseFragments::new(BufReader::new(
            response.into_reader(),
        ))))
    }
}

/// Iterator over the content deltas of a chat-completions SSE stream.
pub struct SseFragments<R: BufRead> {
    reader: Option<R>,
}

impl<R: BufRead> SseFragments<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }

    /// Release the upstream response. Idempotent.
    pub fn abort(&mut self) {
        if self.reader.take().is_some() {
            debug!("aborting completion stream");
        }
    }

    fn finish(&mut self) {
        self.reader = None;
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<String, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.finish();
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.finish();
                    return Some(Err(ProviderError::Read(e)));
                }
            }

            let line = line.trim_end_matches(['\r', '\n']);
            let Some(data) = line.strip_prefix("data:") else {
                // Blank separators, comments (`:`), `event:` and `id:` fields.
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                self.finish();
                return None;
            }

            match parse_chunk(data) {
                Ok(Some(content)) => return Some(Ok(content)),
                Ok(None) => continue,
                Err(e) => {
                    self.finish();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<R: BufRead> Drop for SseFragments<R> {
    fn drop(&mut self) {
        self.abort();
    }
}

fn parse_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    let value: Value =
        serde_json::from_str(data).map_err(|e| ProviderError::Malformed(format!("{e}: {data}")))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::Upstream(message));
    }

    let content = value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_server::serve_once;
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sse(chunks: &[&str]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&format!(
                "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
                serde_json::to_string(chunk).unwrap()
            ));
        }
        out.push_str("data: [DONE]\n\n");
        out
    }

    fn collect(body: &str) -> Vec<Result<String, ProviderError>> {
        SseFragments::new(Cursor::new(body.to_string())).collect()
    }

    #[test]
    fn yields_deltas_in_order_until_done() {
        let fragments: Vec<String> = collect(&sse(&["ls", " -la", "\r"]))
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["ls", " -la", "\r"]);
    }

    #[test]
    fn skips_role_only_and_empty_deltas() {
        let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                    : keep-alive\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"pwd\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
                    data: [DONE]\n\n";
        let fragments: Vec<String> = collect(body).into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["pwd"]);
    }

    #[test]
    fn nothing_after_done_is_read() {
        let body = format!("{}data: {{\"choices\":[{{\"delta\":{{\"content\":\"late\"}}}}]}}\n", sse(&["a"]));
        let fragments: Vec<String> = collect(&body).into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["a"]);
    }

    #[test]
    fn malformed_chunk_is_an_error_and_ends_stream() {
        let results = collect("data: {not json\n\ndata: [DONE]\n\n");
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn error_payload_is_upstream_error() {
        let results = collect("data: {\"error\":{\"message\":\"rate limited\"}}\n\n");
        match &results[0] {
            Err(ProviderError::Upstream(msg)) => assert_eq!(msg, "rate limited"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    struct DropFlag<R> {
        inner: R,
        dropped: Arc<AtomicBool>,
    }

    impl<R: Read> Read for DropFlag<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl<R> Drop for DropFlag<R> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn abandoning_stream_releases_response() {
        let dropped = Arc::new(AtomicBool::new(false));
        let reader = BufReader::new(DropFlag {
            inner: Cursor::new(sse(&["one", "two", "three"])),
            dropped: dropped.clone(),
        });
        let mut stream = SseFragments::new(reader);
        assert_eq!(stream.next().unwrap().unwrap(), "one");
        assert!(!dropped.load(Ordering::SeqCst));

        stream.abort();
        assert!(dropped.load(Ordering::SeqCst));
        assert!(stream.next().is_none());
    }

    #[test]
    fn model_catalog() {
        assert!(OpenAiModel::is_known("gpt-4o"));
        assert!(!OpenAiModel::is_known("gpt-5-imaginary"));
        assert_eq!(OpenAiModel::Gpt35Turbo.as_str(), "gpt-3.5-turbo");
    }

    #[test]
    fn streams_from_http_endpoint() {
        let (base_url, captured) =
            serve_once("200 OK", "text/event-stream", &sse(&["echo", " hi", "\r"]));
        let provider = OpenAiProvider::new(
            &format!("{base_url}/v1/"),
            "sk-test".to_string(),
            "gpt-4o",
            "system rules".to_string(),
            Duration::from_secs(5),
        );
        assert_eq!(provider.name(), "openai:gpt-4o");

        let fragments: Vec<String> = provider
            .generate_text("root@logos_a:/ $ ")
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments.concat(), "echo hi\r");

        let request = captured.recv().unwrap();
        assert_eq!(request.request_line, "POST /v1/chat/completions HTTP/1.1");
        assert!(
            request
                .headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case("authorization: Bearer sk-test"))
        );
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system rules");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "root@logos_a:/ $ ");
    }

    #[test]
    fn http_error_status_is_reported() {
        let (base_url, _captured) =
            serve_once("401 Unauthorized", "application/json", "{\"error\":\"bad key\"}");
        let provider = OpenAiProvider::new(
            &base_url,
            "sk-wrong".to_string(),
            "gpt-4o",
            String::new(),
            Duration::from_secs(5),
        );
        match provider.generate_text("x") {
            Err(ProviderError::Status { code, body }) => {
                assert_eq!(code, 401);
                assert!(body.contains("bad key"));
            }
            Err(other) => panic!("expected status error, got {other:?}"),
            Ok(_) => panic!("expected status error, got a stream"),
        }
    }
}
