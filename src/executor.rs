//! Generation Executor
//!
//! Runs one generation attempt per (file, backend). The attempt streams the
//! response under a timeout; if the stream stalls past the deadline it is
//! dropped and one synchronous request is issued instead, so partial output is
//! never silently kept. Backends that reject streaming generate are retried
//! as chat and remembered as chat-only for the rest of the run. Every
//! successful attempt leaves a candidate artifact under the state directory;
//! the original file is never touched here.

use crate::backend::{BackendDescriptor, GenerateClient, TextStream};
use crate::error::PipelineError;
use crate::state::write_atomic;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// One completed generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub path: PathBuf,
    pub backend_id: String,
    pub prompt: String,
    pub output: String,
    pub latency: Duration,
    /// blake3 hex digest of the output, for artifact identity.
    pub content_hash: String,
    /// True when the streaming attempt timed out and the synchronous
    /// fallback produced the output.
    pub used_fallback: bool,
}

/// Executes attempts against one wire client.
pub struct GenerationExecutor<C: GenerateClient> {
    client: Arc<C>,
    attempt_timeout: Duration,
    artifacts_dir: PathBuf,
}

impl<C: GenerateClient> GenerationExecutor<C> {
    pub fn new(client: Arc<C>, attempt_timeout: Duration, artifacts_dir: PathBuf) -> Self {
        Self {
            client,
            attempt_timeout,
            artifacts_dir,
        }
    }

    /// Run one attempt for `path` on `backend`.
    ///
    /// An empty final text is a failed attempt; the caller records it and
    /// moves on, it never aborts sibling attempts.
    pub async fn run_attempt(
        &self,
        path: &Path,
        backend: &BackendDescriptor,
        prompt: &str,
    ) -> Result<GenerationAttempt, PipelineError> {
        let start = Instant::now();
        let mut used_fallback = false;

        let output = if backend.is_chat_only() {
            self.chat_attempt(path, backend, prompt).await?
        } else {
            match self.client.generate_stream(&backend.id, prompt).await {
                Ok(stream) => match timeout(self.attempt_timeout, collect_stream(stream)).await {
                    Ok(collected) => collected.map_err(|e| attempt_failed(path, backend, e))?,
                    Err(_) => {
                        warn!(
                            file = %path.display(),
                            backend = %backend.id,
                            "streaming attempt timed out; issuing synchronous fallback"
                        );
                        used_fallback = true;
                        self.sync_fallback(path, backend, prompt).await?
                    }
                },
                Err(PipelineError::GenerateUnsupported(reason)) => {
                    debug!(
                        backend = %backend.id,
                        reason,
                        "backend rejects streaming generate; switching to chat for this run"
                    );
                    backend.mark_chat_only();
                    self.chat_attempt(path, backend, prompt).await?
                }
                Err(e) => return Err(attempt_failed(path, backend, e)),
            }
        };

        if output.trim().is_empty() {
            return Err(PipelineError::GenerationFailed {
                path: path.to_path_buf(),
                backend: backend.id.clone(),
                reason: "backend returned empty output".to_string(),
            });
        }

        let latency = start.elapsed();
        let content_hash = blake3::hash(output.as_bytes()).to_hex().to_string();
        self.write_artifact(path, &backend.id, &output)?;
        debug!(
            file = %path.display(),
            backend = %backend.id,
            latency_ms = latency.as_millis() as u64,
            fallback = used_fallback,
            bytes = output.len(),
            "attempt complete"
        );

        Ok(GenerationAttempt {
            path: path.to_path_buf(),
            backend_id: backend.id.clone(),
            prompt: prompt.to_string(),
            output,
            latency,
            content_hash,
            used_fallback,
        })
    }

    async fn sync_fallback(
        &self,
        path: &Path,
        backend: &BackendDescriptor,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        match timeout(self.attempt_timeout, self.client.generate(&backend.id, prompt)).await {
            Ok(result) => result.map_err(|e| attempt_failed(path, backend, e)),
            Err(_) => Err(PipelineError::GenerationFailed {
                path: path.to_path_buf(),
                backend: backend.id.clone(),
                reason: "synchronous fallback timed out".to_string(),
            }),
        }
    }

    async fn chat_attempt(
        &self,
        path: &Path,
        backend: &BackendDescriptor,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        match timeout(self.attempt_timeout, self.client.chat(&backend.id, prompt)).await {
            Ok(result) => result.map_err(|e| attempt_failed(path, backend, e)),
            Err(_) => Err(PipelineError::GenerationFailed {
                path: path.to_path_buf(),
                backend: backend.id.clone(),
                reason: "chat attempt timed out".to_string(),
            }),
        }
    }

    fn write_artifact(
        &self,
        path: &Path,
        backend_id: &str,
        output: &str,
    ) -> Result<(), PipelineError> {
        let artifact = self
            .artifacts_dir
            .join(artifact_name(path, backend_id));
        write_atomic(&artifact, output.as_bytes()).map_err(|e| PipelineError::GenerationFailed {
            path: path.to_path_buf(),
            backend: backend_id.to_string(),
            reason: format!("failed to write candidate artifact: {}", e),
        })
    }
}

async fn collect_stream(mut stream: TextStream) -> Result<String, PipelineError> {
    let mut output = String::new();
    while let Some(fragment) = stream.next().await {
        output.push_str(&fragment?);
    }
    Ok(output)
}

fn attempt_failed(path: &Path, backend: &BackendDescriptor, error: PipelineError) -> PipelineError {
    PipelineError::GenerationFailed {
        path: path.to_path_buf(),
        backend: backend.id.clone(),
        reason: error.to_string(),
    }
}

/// Flatten a relative file path and backend id into one artifact file name.
fn artifact_name(path: &Path, backend_id: &str) -> String {
    let sanitize = |s: &str| s.replace(['/', '\\', ':'], "_");
    format!(
        "{}.{}.txt",
        sanitize(&path.to_string_lossy()),
        sanitize(backend_id)
    )
}
