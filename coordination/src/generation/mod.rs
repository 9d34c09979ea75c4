//! Generation: drives the external code-generation tool.
//!
//! - [`GenerationOrchestrator::run`]: one prompt, tried across the ranked
//!   model list. Only timeouts fall through to the next model.
//! - [`GenerationOrchestrator::run_with_verification`]: two passes
//!   (implementation, then tests), each followed by a bounded
//!   verify-and-fix loop.

pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod tool;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::GenerationError;
pub use orchestrator::{GenerationOrchestrator, GenerationSummary, Pass, PassSummary, RunState};
pub use tool::{AiderCli, GenerationTool, ToolRun};

pub const DEFAULT_MODEL: &str = "ollama_chat/qwen2.5-coder:7b";
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 3;

fn default_model_timeout_secs() -> u64 {
    DEFAULT_MODEL_TIMEOUT_SECS
}

/// One entry of the fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_seconds: u64,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            name: name.into(),
            timeout_seconds,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Fallback list used when none is configured.
pub fn default_models() -> Vec<ModelSpec> {
    vec![ModelSpec::new(DEFAULT_MODEL, DEFAULT_MODEL_TIMEOUT_SECS)]
}

fn default_bin_path() -> String {
    "aider".to_string()
}

fn default_map_tokens() -> u32 {
    1024
}

fn default_max_fix_attempts() -> u32 {
    DEFAULT_MAX_FIX_ATTEMPTS
}

/// `[generator]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_bin_path")]
    pub bin_path: String,
    /// Repository-map token budget passed to the tool.
    #[serde(default = "default_map_tokens")]
    pub map_tokens: u32,
    /// Ordered fallback list; empty means [`default_models`].
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            bin_path: default_bin_path(),
            map_tokens: default_map_tokens(),
            models: Vec::new(),
            max_fix_attempts: default_max_fix_attempts(),
        }
    }
}

impl GeneratorConfig {
    pub fn effective_models(&self) -> Vec<ModelSpec> {
        if self.models.is_empty() {
            default_models()
        } else {
            self.models.clone()
        }
    }
}
