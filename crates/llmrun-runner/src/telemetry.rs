//! Generation statistics and the telemetry hook.
//!
//! - [`GenerationStats`]: time to first token, decode throughput, counts
//! - [`TelemetryHook`]: callbacks at prefill, per token and on completion
//! - [`GenerationTimer`]: records timestamps and produces the stats
//! - [`NoopTelemetry`] / [`RecordingTelemetry`]: built-in hooks

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::runner::Outcome;

/// Summary of one successful generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationStats {
    pub session_id: Uuid,
    /// Prompt tokens processed by prefill.
    pub prompt_tokens: usize,
    /// Tokens delivered to the sink, excluding any echoed prompt.
    pub generated_tokens: usize,
    /// Time from the start of the call until prefill finished.
    pub prefill_ms: f64,
    /// Time from the start of the call until the first generated token was
    /// delivered. `None` when nothing was generated.
    pub first_token_ms: Option<f64>,
    pub total_ms: f64,
    /// Decode throughput; prefill time is excluded.
    pub tokens_per_sec: f64,
    pub outcome: Outcome,
}

/// Callback interface for real-time generation telemetry.
///
/// All methods default to no-ops so hooks can be selective. Hooks run on the
/// generating thread.
pub trait TelemetryHook: Send + Sync {
    fn on_prefill_complete(&self, _prefill_ms: f64) {}

    /// `token_idx` is 1-based.
    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    fn on_generation_complete(&self, _stats: &GenerationStats) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Keeps the stats of the most recent completed generation.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    last: Arc<Mutex<Option<GenerationStats>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_stats(&self) -> Option<GenerationStats> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for RecordingTelemetry {
    fn on_generation_complete(&self, stats: &GenerationStats) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
    }
}

/// Records timestamps during one generation.
///
/// 1. [`GenerationTimer::new`] when the call starts
/// 2. [`mark_prefill_complete`](Self::mark_prefill_complete) after prefill
/// 3. [`mark_token`](Self::mark_token) after each delivered token
/// 4. [`finish`](Self::finish) to compute the stats
pub struct GenerationTimer<'a> {
    session_id: Uuid,
    prompt_tokens: usize,
    start: Instant,
    prefill_end: Option<Instant>,
    first_token: Option<Instant>,
    token_count: usize,
    hook: &'a dyn TelemetryHook,
}

impl<'a> GenerationTimer<'a> {
    pub fn new(session_id: Uuid, hook: &'a dyn TelemetryHook) -> Self {
        Self {
            session_id,
            prompt_tokens: 0,
            start: Instant::now(),
            prefill_end: None,
            first_token: None,
            token_count: 0,
            hook,
        }
    }

    pub fn set_prompt_tokens(&mut self, n: usize) {
        self.prompt_tokens = n;
    }

    pub fn mark_prefill_complete(&mut self) {
        let now = Instant::now();
        self.prefill_end = Some(now);
        self.hook.on_prefill_complete(ms_between(self.start, now));
    }

    pub fn mark_token(&mut self) {
        let now = Instant::now();
        self.token_count += 1;
        self.first_token.get_or_insert(now);
        self.hook
            .on_token_generated(self.token_count, ms_between(self.start, now));
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Compute the stats and report them to the hook.
    pub fn finish(self, outcome: Outcome) -> GenerationStats {
        let end = Instant::now();
        let total_ms = ms_between(self.start, end);
        let prefill_ms = self
            .prefill_end
            .map(|t| ms_between(self.start, t))
            .unwrap_or(0.0);

        let decode_ms = total_ms - prefill_ms;
        let tokens_per_sec = if decode_ms > 0.0 && self.token_count > 0 {
            self.token_count as f64 / (decode_ms / 1000.0)
        } else {
            0.0
        };

        let stats = GenerationStats {
            session_id: self.session_id,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            prefill_ms,
            first_token_ms: self.first_token.map(|t| ms_between(self.start, t)),
            total_ms,
            tokens_per_sec,
            outcome,
        };
        self.hook.on_generation_complete(&stats);
        stats
    }
}

fn ms_between(from: Instant, to: Instant) -> f64 {
    to.duration_since(from).as_secs_f64() * 1000.0
}
