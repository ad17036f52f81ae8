//! # llmrun-engine
//!
//! The "narrow waist" of the llmrun stack. Defines the [`ExecutionEngine`] trait
//! and the types that cross it. The generation runner drives any engine through
//! this contract without knowing how tensors are executed, so CPU, accelerator
//! and FFI backends are interchangeable.
//!
//! ## Design Notes
//!
//! ### Exclusive access
//! Engine methods take `&mut self`. An engine carries incremental state (the
//! cache built by prefill and extended by every step), and exactly one
//! generation may touch it at a time. The runner enforces that by owning the
//! engine behind a lock it only takes while a session is active.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Errors reported by an execution engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    Load(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("context capacity exceeded: need {needed} positions, capacity is {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },
    #[error("engine is not loaded")]
    NotLoaded,
}

/// Static facts an engine reports about the loaded model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineMetadata {
    /// Maximum number of positions (prompt + generated) the cache can hold.
    /// `None` means the engine imposes no limit of its own.
    pub max_context_len: Option<usize>,

    /// Token IDs the model uses to end a sequence.
    pub eos_ids: Vec<TokenId>,
}

/// Result of the prefill phase (prompt processing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefillResult {
    /// Number of tokens processed.
    pub tokens_processed: usize,
}

/// Result of a single decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutput {
    /// The engine produced the next token.
    Token(TokenId),
    /// The engine decided the sequence is over.
    EndOfSequence,
}

impl StepOutput {
    /// The produced token, if any.
    pub fn token(&self) -> Option<TokenId> {
        match self {
            StepOutput::Token(id) => Some(*id),
            StepOutput::EndOfSequence => None,
        }
    }
}

/// Sampling hyperparameters.
///
/// Opaque to the runner: it forwards them to the engine at prefill and the
/// engine decides how (or whether) to honour them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for softmax scaling.
    /// - 0.0: greedy (argmax)
    /// - 0.1-0.5: focused / factual
    /// - 0.7-1.0: balanced
    /// - 1.0+: creative / diverse
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top-K: restrict to the K most likely tokens. 0 = disabled.
    #[serde(default)]
    pub top_k: usize,

    /// Top-P (nucleus): restrict to the smallest set whose cumulative
    /// probability exceeds P. 1.0 = disabled.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Repetition penalty (1.0 = none). Values > 1.0 discourage repetition.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    /// Seed for the sampler's RNG.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_repetition_penalty() -> f32 {
    1.0
}
fn default_seed() -> u64 {
    42
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingParams {
            temperature: default_temperature(),
            top_k: 0,
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
            seed: default_seed(),
        }
    }
}

impl SamplingParams {
    /// Greedy sampling (temperature = 0).
    pub fn greedy() -> Self {
        SamplingParams {
            temperature: 0.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            seed: default_seed(),
        }
    }

    /// Whether these parameters select plain argmax decoding.
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

/// The contract between the generation runner and a tensor-execution backend.
///
/// A generation drives an engine as:
///
/// ```text
/// reset → prefill(prompt) → step(p) → step(p + 1) → ... → reset
/// ```
///
/// where `p` is the number of prompt tokens. The cache produced by prefill is
/// owned by the engine and never seen by the caller.
pub trait ExecutionEngine: Send {
    /// Load weights and allocate whatever the backend needs.
    fn load(&mut self) -> Result<()>;

    /// Whether [`load`](Self::load) has succeeded.
    fn is_loaded(&self) -> bool;

    /// Model facts used to bound generation. Defaults to "no limits, no EOS ids".
    fn metadata(&self) -> EngineMetadata {
        EngineMetadata::default()
    }

    /// Process the prompt tokens and populate the incremental cache.
    fn prefill(&mut self, tokens: &[TokenId], sampling: &SamplingParams)
        -> Result<PrefillResult>;

    /// Produce the token at `position` and extend the cache by one entry.
    fn step(&mut self, position: usize) -> Result<StepOutput>;

    /// Drop the incremental cache so the next prefill starts clean.
    fn reset(&mut self);
}

impl<E: ExecutionEngine + ?Sized> ExecutionEngine for Box<E> {
    fn load(&mut self) -> Result<()> {
        (**self).load()
    }

    fn is_loaded(&self) -> bool {
        (**self).is_loaded()
    }

    fn metadata(&self) -> EngineMetadata {
        (**self).metadata()
    }

    fn prefill(&mut self, tokens: &[TokenId], sampling: &SamplingParams) -> Result<PrefillResult> {
        (**self).prefill(tokens, sampling)
    }

    fn step(&mut self, position: usize) -> Result<StepOutput> {
        (**self).step(position)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
