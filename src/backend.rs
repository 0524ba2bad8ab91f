//! Backend Pool & Wire Client
//!
//! Uniform access to generative-text backends over the Ollama wire protocol:
//! `/api/generate` (streaming or single-shot), `/api/chat`, and the
//! `/api/tags` capability probe. The pool tracks per-backend capability flags
//! discovered at runtime — a backend that rejects streaming generate is
//! marked chat-only for the remainder of the run.

use crate::error::PipelineError;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Streaming text fragments from a generate call.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, PipelineError>> + Send>>;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Client trait over the backend wire protocol, mockable for tests.
#[async_trait]
pub trait GenerateClient: Send + Sync {
    /// Capability probe: list models on the host. Must succeed before any
    /// generation; an unreachable host is a fatal startup condition.
    async fn probe(&self) -> Result<Vec<String>, PipelineError>;

    /// Streaming generate: incremental text fragments.
    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<TextStream, PipelineError>;

    /// Single-shot (non-streaming) generate.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, PipelineError>;

    /// Chat-style request; text is taken from `message.content`.
    async fn chat(&self, model: &str, prompt: &str) -> Result<String, PipelineError>;
}

/// One configured backend and its runtime-discovered capabilities.
#[derive(Debug)]
pub struct BackendDescriptor {
    pub id: String,
    chat_only: AtomicBool,
}

impl BackendDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_only: AtomicBool::new(false),
        }
    }

    /// True once the backend has rejected a streaming generate this run.
    pub fn is_chat_only(&self) -> bool {
        self.chat_only.load(Ordering::Relaxed)
    }

    pub fn mark_chat_only(&self) {
        self.chat_only.store(true, Ordering::Relaxed);
    }
}

/// Ordered pool of configured backends.
#[derive(Debug, Clone)]
pub struct BackendPool {
    backends: Vec<Arc<BackendDescriptor>>,
}

impl BackendPool {
    pub fn new(ids: &[String]) -> Self {
        Self {
            backends: ids
                .iter()
                .map(|id| Arc::new(BackendDescriptor::new(id.clone())))
                .collect(),
        }
    }

    /// Backends in configured order.
    pub fn all(&self) -> &[Arc<BackendDescriptor>] {
        &self.backends
    }

    /// Backends ranked by historical score, descending. Backends without
    /// history keep their configured relative order (stable sort). The
    /// ranking sets selection tie-break preference only — callers still
    /// invoke every backend concurrently.
    pub fn ranked<F>(&self, score_of: F) -> Vec<Arc<BackendDescriptor>>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut ranked = self.backends.clone();
        ranked.sort_by(|a, b| {
            let sa = score_of(&a.id).unwrap_or(f64::MIN);
            let sb = score_of(&b.id).unwrap_or(f64::MIN);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

// Wire request/response structures

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_http_client() -> Result<Client, PipelineError> {
    // No overall request timeout: streaming responses can legitimately run
    // long, and the executor bounds each attempt itself.
    Client::builder()
        .no_proxy()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| PipelineError::BackendRequestFailed(format!("Failed to create HTTP client: {}", e)))
}

fn map_http_error(error: reqwest::Error) -> PipelineError {
    if error.is_connect() {
        PipelineError::BackendUnreachable(format!("Connection error: {}", error))
    } else if error.is_timeout() {
        PipelineError::BackendRequestFailed(format!("Request timeout: {}", error))
    } else {
        PipelineError::BackendRequestFailed(format!("HTTP error: {}", error))
    }
}

/// Ollama-protocol client bound to one host.
pub struct OllamaClient {
    client: Client,
    host: String,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>) -> Result<Self, PipelineError> {
        let host = host.into().trim_end_matches('/').to_string();
        Ok(Self {
            client: build_http_client()?,
            host,
        })
    }

    async fn send_generate(
        &self,
        model: &str,
        prompt: &str,
        stream: bool,
    ) -> Result<reqwest::Response, PipelineError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream,
        };
        let url = format!("{}/api/generate", self.host);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                // Older hosts without a generate endpoint, or hosts rejecting
                // the streaming form: signal the capability to the caller.
                400 | 404 | 405 if stream => PipelineError::GenerateUnsupported(format!(
                    "model '{}': status {} - {}",
                    model, status, body
                )),
                404 => {
                    PipelineError::BackendModelNotFound(format!("model '{}': {}", model, body))
                }
                _ => PipelineError::BackendRequestFailed(format!(
                    "generate failed with status {}: {}",
                    status, body
                )),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerateClient for OllamaClient {
    async fn probe(&self) -> Result<Vec<String>, PipelineError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::BackendUnreachable(format!("{}: {}", self.host, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::BackendUnreachable(format!(
                "{}: capability probe returned status {}",
                self.host,
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await.map_err(|e| {
            PipelineError::BackendUnreachable(format!("Failed to parse tags response: {}", e))
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<TextStream, PipelineError> {
        let response = self.send_generate(model, prompt, true).await?;
        Ok(decode_generate_stream(response))
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, PipelineError> {
        let response = self.send_generate(model, prompt, false).await?;
        let chunk: GenerateChunk = response.json().await.map_err(|e| {
            PipelineError::BackendRequestFailed(format!("Failed to parse generate response: {}", e))
        })?;
        Ok(chunk.response)
    }

    async fn chat(&self, model: &str, prompt: &str) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: prompt.to_string(),
            }],
            stream: false,
        };
        let url = format!("{}/api/chat", self.host);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                404 => PipelineError::BackendModelNotFound(format!("model '{}': {}", model, body)),
                _ => PipelineError::BackendRequestFailed(format!(
                    "chat failed with status {}: {}",
                    status, body
                )),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            PipelineError::BackendRequestFailed(format!("Failed to parse chat response: {}", e))
        })?;
        Ok(parsed.message.content)
    }
}

/// Decode a streaming generate body: newline-delimited JSON objects, each
/// carrying an incremental `response` field.
fn decode_generate_stream(response: reqwest::Response) -> TextStream {
    let body = response
        .bytes_stream()
        .map(|result| result.map(|bytes| bytes.to_vec()).map_err(map_http_error));
    decode_chunk_lines(body)
}

/// Line-split the raw byte stream and parse each line as a chunk object.
///
/// The buffer stays in bytes until a full line arrives, so a multi-byte
/// UTF-8 character split across two network chunks is reassembled intact.
fn decode_chunk_lines<S>(body: S) -> TextStream
where
    S: Stream<Item = Result<Vec<u8>, PipelineError>> + Send + 'static,
{
    let stream = futures::stream::try_unfold(
        (Box::pin(body), Vec::new()),
        |(mut body, mut buf): (_, Vec<u8>)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = line.trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    let chunk = parse_chunk_line(line)?;
                    return Ok(Some((chunk.response, (body, buf))));
                }

                match body.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Err(e),
                    None => {
                        if buf.trim_ascii().is_empty() {
                            return Ok(None);
                        }
                        let chunk = parse_chunk_line(buf.trim_ascii())?;
                        buf.clear();
                        return Ok(Some((chunk.response, (body, buf))));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

fn parse_chunk_line(line: &[u8]) -> Result<GenerateChunk, PipelineError> {
    serde_json::from_slice(line)
        .map_err(|e| PipelineError::BackendRequestFailed(format!("Invalid stream chunk: {}", e)))
}
