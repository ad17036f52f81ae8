//! Per-call generation configuration.
//!
//! # JSON Format
//! ```json
//! {
//!   "max_tokens": 128,
//!   "stop_tokens": [2],
//!   "sampling": { "temperature": 0.0 },
//!   "echo": false,
//!   "stop_token_policy": "suppress"
//! }
//! ```
//! Every field is optional.

use std::path::{Path, PathBuf};

use llmrun_engine::{SamplingParams, TokenId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What happens to the text of a token that matches the stop set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTokenPolicy {
    /// End the loop without delivering the stop token.
    #[default]
    Suppress,
    /// Deliver the stop token's text, then end the loop.
    Deliver,
}

/// Configuration for one `generate` call. Immutable for the call's duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Cap on generated tokens delivered to the sink. `0` runs prefill only.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Token IDs that end generation. The engine's own EOS IDs are added to
    /// these at run time.
    #[serde(default)]
    pub stop_tokens: Vec<TokenId>,

    /// Forwarded to the engine untouched.
    #[serde(default)]
    pub sampling: SamplingParams,

    /// Deliver the prompt text to the sink before generating. The echo does
    /// not count against `max_tokens`.
    #[serde(default)]
    pub echo: bool,

    #[serde(default)]
    pub stop_token_policy: StopTokenPolicy,
}

fn default_max_tokens() -> usize {
    256
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            stop_tokens: Vec::new(),
            sampling: SamplingParams::default(),
            echo: false,
            stop_token_policy: StopTokenPolicy::default(),
        }
    }
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_stop_tokens(mut self, tokens: impl IntoIterator<Item = TokenId>) -> Self {
        self.stop_tokens = tokens.into_iter().collect();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_stop_token_policy(mut self, policy: StopTokenPolicy) -> Self {
        self.stop_token_policy = policy;
        self
    }
}
