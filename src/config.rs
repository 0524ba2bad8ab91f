//! Configuration System
//!
//! TOML-backed configuration for a project root. The file lives at
//! `<root>/.reforge/config.toml`; every field has a serde default so a missing
//! or partial file yields a runnable configuration. `REFORGE_HOST` overrides
//! the backend host for one invocation.

use crate::error::PipelineError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReforgeConfig {
    /// Backend host, e.g. `http://localhost:11434`
    #[serde(default = "default_host")]
    pub host: String,

    /// Ordered backend model identifiers; order is the default ranking
    /// when the scoreboard has no history for a backend
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    /// Model used for meta-evaluation of candidate outputs
    #[serde(default = "default_evaluator")]
    pub evaluator: String,

    /// Global cap on simultaneously in-flight file tasks
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-attempt timeout in seconds (streaming and fallback each get one)
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Apply merges without interactive confirmation
    #[serde(default)]
    pub auto_approve: bool,

    /// Reject runs whose dependency graph contains a cycle instead of
    /// batching the cyclic remainder into one unordered terminal level
    #[serde(default)]
    pub strict_cycles: bool,

    /// Directory/file name patterns excluded from scanning
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_backends() -> Vec<String> {
    vec!["mistral".to_string()]
}

fn default_evaluator() -> String {
    "mistral".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".reforge".to_string(),
        ".git".to_string(),
        "target".to_string(),
        "node_modules".to_string(),
    ]
}

impl Default for ReforgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backends: default_backends(),
            evaluator: default_evaluator(),
            concurrency: default_concurrency(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            auto_approve: false,
            strict_cycles: false,
            ignore_patterns: default_ignore_patterns(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ReforgeConfig {
    /// Load configuration for a project root.
    ///
    /// Missing file yields defaults; a present but unparseable file is a
    /// configuration error. `REFORGE_HOST` overrides the host afterwards.
    pub fn load(root: &Path) -> Result<Self, PipelineError> {
        let path = root.join(".reforge").join("config.toml");
        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                PipelineError::ConfigError(format!("Failed to read {:?}: {}", path, e))
            })?;
            toml::from_str(&contents).map_err(|e| {
                PipelineError::ConfigError(format!("Failed to parse {:?}: {}", path, e))
            })?
        } else {
            Self::default()
        };

        if let Ok(host) = std::env::var("REFORGE_HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.host.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "Backend host cannot be empty".to_string(),
            ));
        }
        if self.backends.is_empty() {
            return Err(PipelineError::ConfigError(
                "Backend pool cannot be empty".to_string(),
            ));
        }
        if self.backends.iter().any(|b| b.trim().is_empty()) {
            return Err(PipelineError::ConfigError(
                "Backend pool contains an empty model identifier".to_string(),
            ));
        }
        if self.evaluator.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "Evaluator model cannot be empty".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "Concurrency cap must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(PipelineError::ConfigError(
                "Attempt timeout must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}
