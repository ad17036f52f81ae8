//! # llmrun-sampling
//!
//! Turns a logit vector into the next token for engines that sample on the
//! CPU. The runner never calls this crate; it only forwards
//! [`SamplingParams`] to the engine, which builds a [`Sampler`] from them.
//!
//! Pipeline, in order:
//! 1. Repetition penalty over the tokens seen so far
//! 2. Greedy argmax when temperature is 0
//! 3. Temperature scaling
//! 4. Top-k filtering
//! 5. Top-p (nucleus) filtering
//! 6. Draw from a seeded xorshift RNG

use llmrun_engine::{SamplingParams, TokenId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("empty or non-finite logits")]
    InvalidLogits,
    #[error("no valid tokens after filtering")]
    NoValidTokens,
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Deterministic RNG for reproducible sampling (xorshift64).
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Stateful sampler; the RNG advances on every draw.
#[derive(Debug, Clone)]
pub struct Sampler {
    params: SamplingParams,
    rng: SeededRng,
}

impl Sampler {
    pub fn new(params: SamplingParams) -> Self {
        let rng = SeededRng::new(params.seed);
        Self { params, rng }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Sample a token from logits.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<TokenId> {
        self.sample_with_history(logits, &[])
    }

    /// Sample with history for repetition penalty.
    pub fn sample_with_history(
        &mut self,
        logits: &[f32],
        history: &[TokenId],
    ) -> SamplingResult<TokenId> {
        if logits.is_empty() || logits.iter().any(|l| l.is_nan()) {
            return Err(SamplingError::InvalidLogits);
        }

        let mut work = logits.to_vec();
        apply_repetition_penalty(&mut work, history, self.params.repetition_penalty);

        if self.params.is_greedy() {
            return Ok(argmax(&work) as TokenId);
        }

        if (self.params.temperature - 1.0).abs() > 1e-6 {
            for logit in &mut work {
                *logit /= self.params.temperature;
            }
        }

        apply_top_k(&mut work, self.params.top_k);
        let mut probs = softmax(&work);
        if self.params.top_p < 1.0 {
            apply_top_p(&mut probs, self.params.top_p);
        }

        self.draw(&probs).map(|i| i as TokenId)
    }

    fn draw(&mut self, probs: &[f32]) -> SamplingResult<usize> {
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;
        for (i, &p) in probs.iter().enumerate() {
            cumsum += p;
            if r < cumsum {
                return Ok(i);
            }
        }
        // Rounding left r past the total; take the last live token.
        probs
            .iter()
            .rposition(|&p| p > 0.0)
            .ok_or(SamplingError::NoValidTokens)
    }
}

/// Positive logits are divided by the penalty, negative ones multiplied, so
/// a repeated token always loses probability.
fn apply_repetition_penalty(logits: &mut [f32], history: &[TokenId], penalty: f32) {
    if (penalty - 1.0).abs() < 1e-6 {
        return;
    }
    for &token in history {
        if let Some(logit) = usize::try_from(token).ok().and_then(|i| logits.get_mut(i)) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }
    let mut sorted = logits.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = sorted[k - 1];
    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

/// Zero every probability below the nucleus cutoff and renormalize.
fn apply_top_p(probs: &mut [f32], p: f32) {
    let mut sorted = probs.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumsum = 0.0;
    let mut cutoff = sorted[0];
    for &prob in &sorted {
        cumsum += prob;
        cutoff = prob;
        if cumsum >= p {
            break;
        }
    }

    for prob in probs.iter_mut() {
        if *prob < cutoff {
            *prob = 0.0;
        }
    }
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for prob in probs.iter_mut() {
            *prob /= sum;
        }
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}
