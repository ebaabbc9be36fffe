//! Streaming chat client for a local Ollama-compatible backend.
//!
//! A generation call yields text fragments lazily as the backend produces them,
//! so callers can render tokens as they arrive. Each stream is consumed once.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_HOST: &str = "http://localhost:11434";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("cannot reach model backend: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model stream interrupted: {0}")]
    Stream(#[from] io::Error),

    #[error("malformed model stream line: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("model backend error: {0}")]
    Backend(String),

    #[error("model stream ended before completion")]
    Truncated,
}

/// One incremental piece of a streamed response.
pub type Fragment = String;

pub type FragmentStream<'a> = Box<dyn Iterator<Item = Result<Fragment, ModelError>> + 'a>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatOptions {
    pub num_predict: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: ChatOptions,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Something that can answer a chat request with a fragment stream.
pub trait ChatBackend {
    fn chat_stream(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ModelError>;
}

/// Which model to ask, how to prime it, and how long it may answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationProfile {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
}

pub struct ModelClient<B> {
    backend: B,
}

impl<B: ChatBackend> ModelClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn generate(
        &self,
        profile: &GenerationProfile,
        user_prompt: &str,
    ) -> Result<FragmentStream<'_>, ModelError> {
        let request = ChatRequest {
            model: profile.model.clone(),
            messages: vec![
                Message::system(profile.system_prompt.as_str()),
                Message::user(user_prompt),
            ],
            options: ChatOptions { num_predict: profile.max_tokens },
            stream: true,
        };
        debug!(model = %request.model, max_tokens = profile.max_tokens, "starting generation");
        self.backend.chat_stream(&request)
    }
}

/// Drains a fragment stream, handing each fragment to `visit` as it arrives.
///
/// Returns the concatenated text, or `Ok(None)` when the visitor broke off.
pub fn consume<F>(stream: FragmentStream<'_>, mut visit: F) -> Result<Option<String>, ModelError>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    let mut full = String::new();
    for fragment in stream {
        let fragment = fragment?;
        full.push_str(&fragment);
        if visit(&fragment).is_break() {
            return Ok(None);
        }
    }
    Ok(Some(full))
}

/// Blocking HTTP client for `POST /api/chat`.
pub struct OllamaClient {
    client: Client,
    endpoint: String,
}

impl OllamaClient {
    pub fn new(host: &str, request_timeout: Duration) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatBackend for OllamaClient {
    fn chat_stream(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ModelError> {
        debug!(endpoint = %self.endpoint, "sending chat request");
        let response = self.client.post(&self.endpoint).json(request).send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Status { status: status.as_u16(), body: body.trim().to_string() });
        }

        Ok(Box::new(NdjsonFragments::new(BufReader::new(response))))
    }
}

/// Parses newline-delimited chat chunks into fragments.
///
/// Stops after a `done` chunk. An `error` chunk, a bad line, or EOF before
/// `done` each yield one error and end the stream.
pub struct NdjsonFragments<R> {
    lines: io::Lines<R>,
    finished: bool,
}

impl<R: BufRead> NdjsonFragments<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), finished: false }
    }

    fn fail(&mut self, err: ModelError) -> Option<Result<Fragment, ModelError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for NdjsonFragments<R> {
    type Item = Result<Fragment, ModelError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let raw = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return self.fail(ModelError::Stream(e)),
                None => return self.fail(ModelError::Truncated),
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let chunk: ChatChunk = match serde_json::from_str(line) {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(ModelError::Decode(e)),
            };
            if let Some(message) = chunk.error {
                return self.fail(ModelError::Backend(message));
            }
            if chunk.done {
                self.finished = true;
            }

            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;

    fn fragments(body: &str) -> Vec<Result<Fragment, ModelError>> {
        NdjsonFragments::new(Cursor::new(body.to_string())).collect()
    }

    struct RecordingBackend {
        seen: RefCell<Vec<ChatRequest>>,
    }

    impl ChatBackend for RecordingBackend {
        fn chat_stream(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ModelError> {
            self.seen.borrow_mut().push(request.clone());
            Ok(Box::new(vec![Ok("ls".to_string())].into_iter()))
        }
    }

    #[test]
    fn parses_streamed_chunks_in_order() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"du"},"done":false}"#, "\n",
            r#"{"message":{"role":"assistant","content":" -sh"},"done":false}"#, "\n",
            "\n",
            r#"{"message":{"role":"assistant","content":" /"},"done":false}"#, "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true,"eval_count":3}"#, "\n",
            r#"{"message":{"role":"assistant","content":"ignored"},"done":false}"#, "\n",
        );
        let texts: Vec<String> = fragments(body).into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(texts, vec!["du", " -sh", " /"]);
    }

    #[test]
    fn backend_error_ends_stream() {
        let body = concat!(
            r#"{"message":{"content":"ls"},"done":false}"#, "\n",
            r#"{"error":"model runner crashed"}"#, "\n",
        );
        let items = fragments(body);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(ModelError::Backend(msg)) if msg == "model runner crashed"));
    }

    #[test]
    fn eof_without_done_is_truncation() {
        let items = fragments("{\"message\":{\"content\":\"ls\"},\"done\":false}\n");
        assert!(matches!(items.last(), Some(Err(ModelError::Truncated))));
    }

    #[test]
    fn garbage_line_is_decode_error() {
        let items = fragments("not json\n");
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ModelError::Decode(_))));
    }

    #[test]
    fn request_shape_matches_chat_api() {
        let backend = RecordingBackend { seen: RefCell::new(Vec::new()) };
        let client = ModelClient::new(backend);
        let profile = GenerationProfile {
            model: "phi3".into(),
            system_prompt: "be brief".into(),
            max_tokens: 32,
        };
        let _ = client.generate(&profile, "show disk usage").unwrap();

        let seen = client.backend().seen.borrow();
        let json = serde_json::to_value(&seen[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "phi3",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "show disk usage"}
                ],
                "options": {"num_predict": 32},
                "stream": true
            })
        );
    }

    #[test]
    fn consume_concatenates_and_visits() {
        let stream: FragmentStream<'_> =
            Box::new(["du", " -", "sh ", "/"].into_iter().map(|s| Ok(s.to_string())));
        let mut seen = Vec::new();
        let full = consume(stream, |f| {
            seen.push(f.to_string());
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(full.as_deref(), Some("du -sh /"));
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn consume_stops_on_break() {
        let stream: FragmentStream<'_> =
            Box::new(["a", "b", "c"].into_iter().map(|s| Ok(s.to_string())));
        let mut count = 0;
        let full = consume(stream, |_| {
            count += 1;
            if count == 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();
        assert_eq!(full, None);
        assert_eq!(count, 2);
    }

    #[test]
    fn unreachable_backend_is_an_error() {
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let request = ChatRequest {
            model: "phi3".into(),
            messages: vec![Message::user("hi")],
            options: ChatOptions { num_predict: 1 },
            stream: true,
        };
        assert!(client.chat_stream(&request).is_err());
    }
}
