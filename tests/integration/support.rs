//! Scripted backend host shared by the end-to-end tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use reforge::backend::{GenerateClient, TextStream};
use reforge::config::ReforgeConfig;
use reforge::error::PipelineError;
use std::collections::HashMap;
use std::sync::Arc;

/// Model id the scripted judge answers under.
pub const JUDGE: &str = "judge";

/// Per-model behavior of the scripted host.
pub enum ModelBehavior {
    /// Streaming generate succeeds with this full text.
    Text(String),
    /// Every attempt against this model fails.
    Fail,
    /// Streaming generate is rejected as unsupported; chat returns this text.
    ChatOnly(String),
}

/// Fake Ollama host. The judge model grades candidates containing the word
/// `excellent` highly and everything else poorly, so tests can steer
/// selection through candidate text alone.
pub struct ScriptedHost {
    behaviors: HashMap<String, ModelBehavior>,
    unreachable: bool,
    stream_calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            unreachable: false,
            stream_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_model(mut self, id: &str, behavior: ModelBehavior) -> Self {
        self.behaviors.insert(id.to_string(), behavior);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of streaming-generate calls made against a model.
    pub fn stream_calls(&self, id: &str) -> usize {
        self.stream_calls.lock().get(id).copied().unwrap_or(0)
    }

    fn behavior(&self, model: &str) -> Result<&ModelBehavior, PipelineError> {
        self.behaviors
            .get(model)
            .ok_or_else(|| PipelineError::BackendModelNotFound(model.to_string()))
    }
}

#[async_trait]
impl GenerateClient for ScriptedHost {
    async fn probe(&self) -> Result<Vec<String>, PipelineError> {
        if self.unreachable {
            return Err(PipelineError::BackendUnreachable(
                "scripted host down".to_string(),
            ));
        }
        let mut models: Vec<String> = self.behaviors.keys().cloned().collect();
        models.push(JUDGE.to_string());
        Ok(models)
    }

    async fn generate_stream(
        &self,
        model: &str,
        _prompt: &str,
    ) -> Result<TextStream, PipelineError> {
        *self
            .stream_calls
            .lock()
            .entry(model.to_string())
            .or_insert(0) += 1;
        match self.behavior(model)? {
            ModelBehavior::Text(text) => {
                // Deliver in two fragments so collection is exercised.
                let mid = text.len() / 2;
                let fragments: Vec<Result<String, PipelineError>> = vec![
                    Ok(text[..mid].to_string()),
                    Ok(text[mid..].to_string()),
                ];
                Ok(Box::pin(futures::stream::iter(fragments)))
            }
            ModelBehavior::Fail => Err(PipelineError::BackendRequestFailed(format!(
                "scripted failure for {}",
                model
            ))),
            ModelBehavior::ChatOnly(_) => Err(PipelineError::GenerateUnsupported(format!(
                "model '{}': status 404",
                model
            ))),
        }
    }

    async fn generate(&self, model: &str, _prompt: &str) -> Result<String, PipelineError> {
        match self.behavior(model)? {
            ModelBehavior::Text(text) => Ok(text.clone()),
            ModelBehavior::Fail => Err(PipelineError::BackendRequestFailed(format!(
                "scripted failure for {}",
                model
            ))),
            ModelBehavior::ChatOnly(_) => Err(PipelineError::GenerateUnsupported(format!(
                "model '{}': status 404",
                model
            ))),
        }
    }

    async fn chat(&self, model: &str, prompt: &str) -> Result<String, PipelineError> {
        if model == JUDGE {
            let verdict = if prompt.contains("excellent") {
                r#"{"coherence": 92, "improvement": 88, "memory_alignment": 90}"#
            } else {
                r#"{"coherence": 45, "improvement": 40, "memory_alignment": 50}"#
            };
            return Ok(verdict.to_string());
        }
        match self.behavior(model)? {
            ModelBehavior::ChatOnly(text) | ModelBehavior::Text(text) => Ok(text.clone()),
            ModelBehavior::Fail => Err(PipelineError::BackendRequestFailed(format!(
                "scripted failure for {}",
                model
            ))),
        }
    }
}

/// Auto-approving config wired to the scripted judge.
pub fn test_config(backends: &[&str]) -> ReforgeConfig {
    ReforgeConfig {
        backends: backends.iter().map(|b| b.to_string()).collect(),
        evaluator: JUDGE.to_string(),
        auto_approve: true,
        ..ReforgeConfig::default()
    }
}
