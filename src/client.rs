//! Ollama API client with NDJSON streaming
//!
//! `/api/generate` with `stream: true` answers with one JSON object per line.
//! The stream is decoded on a background task and forwarded over a channel.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::models::ModelListing;

/// Connect timeout; generation itself is never cut off
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Buffered events between the reader task and the consumer
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Inference failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("model '{model}' not found")]
    ModelNotFound { model: String },
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("{0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Token counts and timing reported on the final chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_duration: Duration,
}

/// Stream events from the API
#[derive(Debug)]
pub enum StreamEvent {
    /// A fragment of generated text
    Fragment(String),
    /// Stream finished
    Done(GenerationStats),
    /// Error occurred; no further events follow
    Error(ClientError),
}

/// The inference service as seen by the rest of the crate
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Installed models, in whatever shape the server uses
    async fn list_models(&self) -> Result<ModelListing, ClientError>;

    /// Start a streamed generation. Errors raised before the first byte
    /// (unknown model, connection refused) are returned directly.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>, ClientError>;
}

// ═══════════════════════════════════════════════════════════════
// OLLAMA
// ═══════════════════════════════════════════════════════════════

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check the server answers; returns its version string
    pub async fn check_connectivity(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .get(self.url("/api/version"))
            .timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let version: VersionResponse = response.json().await?;
        Ok(version.version)
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn list_models(&self) -> Result<ModelListing, ClientError> {
        let response = self.http.get(self.url("/api/tags")).send().await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let body: serde_json::Value = response.json().await?;
        ModelListing::from_json(body)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>, ClientError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: true,
        };

        let response = self
            .http
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = http_error(response).await;
            return Err(classify(err, model));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let model = model.to_string();

        tokio::spawn(async move {
            match read_stream(response, &model, &tx).await {
                Ok(stats) => {
                    let _ = tx.send(StreamEvent::Done(stats)).await;
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e)).await;
                }
            }
        });

        Ok(rx)
    }
}

async fn http_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    ClientError::Http { status, body }
}

/// Map "unknown model" answers onto `ModelNotFound`
pub fn classify(err: ClientError, model: &str) -> ClientError {
    let not_found = match &err {
        ClientError::Http { status, body } => *status == 404 || body.contains("not found"),
        ClientError::Stream(msg) => msg.contains("not found"),
        _ => false,
    };
    if not_found {
        ClientError::ModelNotFound {
            model: model.to_string(),
        }
    } else {
        err
    }
}

async fn read_stream(
    response: reqwest::Response,
    model: &str,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<GenerationStats, ClientError> {
    let mut bytes_stream = response.bytes_stream();
    let mut decoder = LineDecoder::default();

    while let Some(chunk) = bytes_stream.next().await {
        let chunk = chunk.map_err(|e| ClientError::Transport(format!("Stream read error: {}", e)))?;

        for line in decoder.push(&chunk) {
            match parse_line(&line)? {
                Some(GenerateChunk { error: Some(e), .. }) => {
                    return Err(classify(ClientError::Stream(e), model));
                }
                Some(chunk) => {
                    if !chunk.response.is_empty() {
                        let _ = tx.send(StreamEvent::Fragment(chunk.response.clone())).await;
                    }
                    if chunk.done {
                        return Ok(chunk.stats());
                    }
                }
                None => {}
            }
        }
    }

    // Server closed without a done marker; a trailing unterminated line may remain
    if let Some(line) = decoder.finish() {
        if let Some(chunk) = parse_line(&line)? {
            if let Some(e) = chunk.error {
                return Err(classify(ClientError::Stream(e), model));
            }
            if !chunk.response.is_empty() {
                let _ = tx.send(StreamEvent::Fragment(chunk.response.clone())).await;
            }
            if chunk.done {
                return Ok(chunk.stats());
            }
        }
    }

    Err(ClientError::Stream("connection closed before generation finished".into()))
}

fn parse_line(line: &str) -> Result<Option<GenerateChunk>, ClientError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| ClientError::Decode(format!("bad stream chunk: {}", e)))
}

/// Splits a byte stream into newline-terminated lines.
///
/// Bytes are buffered so multi-byte UTF-8 sequences split across network
/// chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

// ═══════════════════════════════════════════════════════════════
// API Types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Nanoseconds
    #[serde(default)]
    total_duration: Option<u64>,
}

impl GenerateChunk {
    fn stats(&self) -> GenerationStats {
        GenerationStats {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
            total_duration: Duration::from_nanos(self.total_duration.unwrap_or(0)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}
