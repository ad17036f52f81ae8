//! Deterministic reference engine.

use std::time::Instant;

use llmrun_engine::{
    EngineError, EngineMetadata, ExecutionEngine, PrefillResult, Result, SamplingParams,
    StepOutput, TokenId,
};
use llmrun_sampling::{Sampler, SeededRng};
use serde::{Deserialize, Serialize};

use crate::cache::ContextCache;

/// Number of trailing positions that contribute to the next-token logits.
const CONTEXT_WINDOW: usize = 8;

/// Weight given to each older position relative to the one after it.
const RECENCY_DECAY: f32 = 0.6;

/// Logit bonus for printable ASCII, so byte-level output stays readable.
const PRINTABLE_BIAS: f32 = 2.0;

/// Configuration for [`ReferenceEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Vocabulary size, including the EOS token.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Width of the embedding vectors.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    /// Positions the context cache can hold (prompt + generated).
    #[serde(default = "default_max_context_len")]
    pub max_context_len: usize,

    /// Token that ends a sequence. `None` disables EOS.
    #[serde(default = "default_eos_id")]
    pub eos_id: Option<TokenId>,

    /// Seed for the weight tables.
    #[serde(default = "default_weight_seed")]
    pub weight_seed: u64,
}

fn default_vocab_size() -> usize {
    257
}
fn default_hidden_size() -> usize {
    32
}
fn default_max_context_len() -> usize {
    512
}
fn default_eos_id() -> Option<TokenId> {
    Some(256)
}
fn default_weight_seed() -> u64 {
    12345
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            vocab_size: default_vocab_size(),
            hidden_size: default_hidden_size(),
            max_context_len: default_max_context_len(),
            eos_id: default_eos_id(),
            weight_seed: default_weight_seed(),
        }
    }
}

impl ReferenceConfig {
    fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.hidden_size == 0 || self.max_context_len == 0 {
            return Err(EngineError::Load(format!(
                "vocab_size, hidden_size and max_context_len must be positive (got {}, {}, {})",
                self.vocab_size, self.hidden_size, self.max_context_len
            )));
        }
        if let Some(eos) = self.eos_id {
            if eos < 0 || eos as usize >= self.vocab_size {
                return Err(EngineError::Load(format!(
                    "eos_id {eos} outside vocabulary of {}",
                    self.vocab_size
                )));
            }
        }
        Ok(())
    }
}

/// Weight tables built by `load`.
struct Weights {
    /// `[vocab_size, hidden_size]`
    embeddings: Vec<f32>,
    /// `[hidden_size, vocab_size]`
    lm_head: Vec<f32>,
}

impl Weights {
    fn generate(config: &ReferenceConfig) -> Self {
        let mut rng = SeededRng::new(config.weight_seed);
        let mut fill = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.next_f32() - 0.5).collect() };
        let size = config.vocab_size * config.hidden_size;
        Self {
            embeddings: fill(size),
            lm_head: fill(size),
        }
    }
}

/// Reference implementation of the engine contract.
///
/// `load` builds seeded weight tables; `prefill` writes the prompt into the
/// context cache and prepares a [`Sampler`]; each `step` computes logits from
/// the cached context, samples, and appends the result.
pub struct ReferenceEngine {
    config: ReferenceConfig,
    weights: Option<Weights>,
    cache: ContextCache,
    sampler: Option<Sampler>,
}

impl ReferenceEngine {
    pub fn new(config: ReferenceConfig) -> Self {
        let cache = ContextCache::new(config.max_context_len);
        Self {
            config,
            weights: None,
            cache,
            sampler: None,
        }
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Positions currently held by the context cache.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn logits(&self, weights: &Weights) -> Vec<f32> {
        let hidden = self.config.hidden_size;
        let vocab = self.config.vocab_size;

        let mut state = vec![0.0f32; hidden];
        let mut scale = 1.0f32;
        for &token in self.cache.tokens().iter().rev().take(CONTEXT_WINDOW) {
            let row = token.rem_euclid(vocab as TokenId) as usize * hidden;
            for (s, e) in state.iter_mut().zip(&weights.embeddings[row..row + hidden]) {
                *s += scale * e;
            }
            scale *= RECENCY_DECAY;
        }

        let mut logits = vec![0.0f32; vocab];
        for (h, &s) in state.iter().enumerate() {
            let row = &weights.lm_head[h * vocab..(h + 1) * vocab];
            for (logit, w) in logits.iter_mut().zip(row) {
                *logit += s * w;
            }
        }
        for (id, logit) in logits.iter_mut().enumerate() {
            if (0x20..0x7F).contains(&id) {
                *logit += PRINTABLE_BIAS;
            }
        }
        logits
    }
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new(ReferenceConfig::default())
    }
}

impl ExecutionEngine for ReferenceEngine {
    fn load(&mut self) -> Result<()> {
        if self.weights.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let start = Instant::now();
        self.weights = Some(Weights::generate(&self.config));
        tracing::debug!(
            vocab_size = self.config.vocab_size,
            hidden_size = self.config.hidden_size,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "reference weights generated"
        );
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.weights.is_some()
    }

    fn metadata(&self) -> EngineMetadata {
        EngineMetadata {
            max_context_len: Some(self.config.max_context_len),
            eos_ids: self.config.eos_id.into_iter().collect(),
        }
    }

    fn prefill(&mut self, tokens: &[TokenId], sampling: &SamplingParams) -> Result<PrefillResult> {
        if self.weights.is_none() {
            return Err(EngineError::NotLoaded);
        }
        if tokens.is_empty() {
            return Err(EngineError::Execution("empty prompt".into()));
        }
        self.cache.write_prefill(tokens)?;
        self.sampler = Some(Sampler::new(sampling.clone()));
        Ok(PrefillResult {
            tokens_processed: tokens.len(),
        })
    }

    fn step(&mut self, position: usize) -> Result<StepOutput> {
        let weights = self.weights.as_ref().ok_or(EngineError::NotLoaded)?;
        if position != self.cache.len() {
            return Err(EngineError::Execution(format!(
                "step at position {position} but cache holds {}",
                self.cache.len()
            )));
        }
        if self.cache.remaining() == 0 {
            return Err(EngineError::CapacityExceeded {
                needed: position + 1,
                capacity: self.cache.capacity(),
            });
        }

        let logits = self.logits(weights);
        let sampler = self
            .sampler
            .as_mut()
            .ok_or_else(|| EngineError::Execution("step before prefill".into()))?;
        let token = sampler
            .sample_with_history(&logits, self.cache.tokens())
            .map_err(|e| EngineError::Execution(e.to_string()))?;

        if Some(token) == self.config.eos_id {
            return Ok(StepOutput::EndOfSequence);
        }
        self.cache.append_token(token)?;
        Ok(StepOutput::Token(token))
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.sampler = None;
    }
}
