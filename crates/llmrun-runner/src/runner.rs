//! The generation runner.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use llmrun_engine::{ExecutionEngine, StepOutput, TokenId};
use llmrun_tokenizer::Tokenizer;
use serde::Serialize;

use crate::config::{GenerationConfig, StopTokenPolicy};
use crate::error::{Result, RunnerError};
use crate::session::Session;
use crate::sink::{DiscardSink, TokenSink};
use crate::state::{RunnerState, StateCell, StopHandle};
use crate::telemetry::{GenerationStats, GenerationTimer, NoopTelemetry, TelemetryHook};

/// How a successful generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The token budget ran out.
    Completed,
    /// A stop request was observed at a step boundary.
    Cancelled,
    /// The engine produced a stop token or signalled end of sequence.
    StoppedAtToken,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::StoppedAtToken => write!(f, "stopped_at_token"),
        }
    }
}

/// Drives an [`ExecutionEngine`] and a [`Tokenizer`] through one generation
/// at a time.
///
/// `Runner` is `Sync`: share it by reference or `Arc` and call
/// [`stop`](Self::stop), [`is_loaded`](Self::is_loaded) or
/// [`state`](Self::state) from other threads while one thread is inside
/// [`generate`](Self::generate).
pub struct Runner<E: ExecutionEngine, T: Tokenizer> {
    state: Arc<StateCell>,
    engine: Mutex<E>,
    tokenizer: T,
    telemetry: Arc<dyn TelemetryHook>,
    last_stats: Mutex<Option<GenerationStats>>,
}

impl<E: ExecutionEngine, T: Tokenizer> Runner<E, T> {
    /// A runner in the `Unloaded` state.
    pub fn new(engine: E, tokenizer: T) -> Self {
        Self {
            state: Arc::new(StateCell::new()),
            engine: Mutex::new(engine),
            tokenizer,
            telemetry: Arc::new(NoopTelemetry),
            last_stats: Mutex::new(None),
        }
    }

    /// Report every generation's timings to `hook`.
    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn state(&self) -> RunnerState {
        self.state.state()
    }

    /// Never blocks.
    pub fn is_loaded(&self) -> bool {
        self.state.state() != RunnerState::Unloaded
    }

    /// Load the engine. A no-op once loaded; `Busy` while generating.
    ///
    /// A failed load leaves the runner `Unloaded`; call again to retry.
    pub fn load(&self) -> Result<()> {
        match self.state.state() {
            RunnerState::Loaded => return Ok(()),
            RunnerState::Generating => return Err(RunnerError::Busy),
            RunnerState::Unloaded => {}
        }

        let mut engine = self.lock_engine();
        // Another thread may have loaded while we waited for the lock.
        if self.state.state() != RunnerState::Unloaded {
            return Ok(());
        }

        match engine.load() {
            Ok(()) => {
                self.state.mark_loaded();
                tracing::info!("engine loaded");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "engine load failed");
                Err(RunnerError::Load(e))
            }
        }
    }

    /// Request cancellation of the in-flight generation.
    ///
    /// Safe from any thread and never blocks. Takes effect at the next step
    /// boundary. No-op when nothing is generating.
    pub fn stop(&self) {
        if self.state.request_cancel() {
            tracing::debug!("cancellation requested");
        }
    }

    /// A handle that can stop this runner without borrowing it.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.state))
    }

    /// Stats of the last successful [`generate`](Self::generate).
    pub fn last_stats(&self) -> Option<GenerationStats> {
        self.last_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop any cached engine state and forget the last stats.
    ///
    /// Holds the runner exclusively while it runs: a concurrent `generate`,
    /// `warmup` or `reset` fails with `Busy` instead of waiting.
    pub fn reset(&self) -> Result<()> {
        let _claim = self.state.claim()?;
        self.lock_engine().reset();
        *self.last_stats.lock().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("runner reset");
        Ok(())
    }

    /// Run one throwaway generation, e.g. to fault in weights before the
    /// first real request. Records no stats.
    pub fn warmup(&self, prompt: &str, max_tokens: usize) -> Result<Outcome> {
        let config = GenerationConfig::default()
            .with_max_tokens(max_tokens)
            .with_sampling(llmrun_engine::SamplingParams::greedy());
        let stats = self.run(prompt, &config, &mut DiscardSink, &NoopTelemetry)?;
        tracing::debug!(generated = stats.generated_tokens, "warmup finished");
        Ok(stats.outcome)
    }

    /// Generate text for `prompt`, delivering each decoded token to `sink`.
    ///
    /// Blocks until the generation ends. Fails with `NotLoaded` before a
    /// successful [`load`](Self::load) and with `Busy` while another
    /// generation is in flight, in both cases without touching the sink.
    /// Whatever happens, the runner is `Loaded` again when this returns.
    pub fn generate<S: TokenSink + ?Sized>(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        sink: &mut S,
    ) -> Result<Outcome> {
        let stats = self.run(prompt, config, sink, &*self.telemetry)?;
        let outcome = stats.outcome;
        *self.last_stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats);
        Ok(outcome)
    }

    fn lock_engine(&self) -> std::sync::MutexGuard<'_, E> {
        // A poisoned lock means a sink panicked mid-generation; the session
        // guard reset the engine while unwinding.
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<S: TokenSink + ?Sized>(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        sink: &mut S,
        hook: &dyn TelemetryHook,
    ) -> Result<GenerationStats> {
        self.state.begin_generation()?;

        let mut engine = self.lock_engine();
        let mut session = Session::open(&mut *engine, &self.state);
        let span = tracing::info_span!("generate", session = %session.id());
        let _enter = span.enter();

        let result = self.drive(&mut session, prompt, config, sink, hook);
        if let Err(e) = &result {
            tracing::warn!(
                error = %e,
                generated = session.generated().len(),
                "generation aborted"
            );
        }
        result
    }

    fn drive<S: TokenSink + ?Sized>(
        &self,
        session: &mut Session<'_, E>,
        prompt: &str,
        config: &GenerationConfig,
        sink: &mut S,
        hook: &dyn TelemetryHook,
    ) -> Result<GenerationStats> {
        let mut timer = GenerationTimer::new(session.id(), hook);

        let prompt_tokens = self.tokenizer.encode(prompt)?;
        if prompt_tokens.is_empty() {
            return Err(RunnerError::EmptyPrompt);
        }
        timer.set_prompt_tokens(prompt_tokens.len());

        let metadata = session.engine().metadata();
        let budget = match metadata.max_context_len {
            Some(max) if prompt_tokens.len() >= max => {
                return Err(RunnerError::ContextOverflow {
                    prompt_tokens: prompt_tokens.len(),
                    max_context_len: max,
                });
            }
            Some(max) => {
                let room = max - prompt_tokens.len();
                if room < config.max_tokens {
                    tracing::debug!(room, requested = config.max_tokens, "token budget capped by context");
                }
                config.max_tokens.min(room)
            }
            None => config.max_tokens,
        };

        let stop_set: HashSet<TokenId> = config
            .stop_tokens
            .iter()
            .chain(&metadata.eos_ids)
            .copied()
            .collect();

        tracing::info!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens = budget,
            "generation started"
        );

        if config.echo {
            sink.accept(prompt).map_err(RunnerError::Callback)?;
        }

        session
            .prefill(&prompt_tokens, &config.sampling)
            .map_err(RunnerError::EngineExecution)?;
        timer.mark_prefill_complete();

        let outcome = self.decode_loop(
            session,
            budget,
            &stop_set,
            config.stop_token_policy,
            sink,
            &mut timer,
        )?;

        // Bytes of a character the sequence never finished.
        let tail = session.decoding_mut().flush();
        if !tail.is_empty() {
            tracing::debug!("flushing incomplete character");
            sink.accept(&tail).map_err(RunnerError::Callback)?;
        }

        tracing::info!(
            outcome = %outcome,
            generated = timer.token_count(),
            "generation finished"
        );
        Ok(timer.finish(outcome))
    }

    fn decode_loop<S: TokenSink + ?Sized>(
        &self,
        session: &mut Session<'_, E>,
        budget: usize,
        stop_set: &HashSet<TokenId>,
        policy: StopTokenPolicy,
        sink: &mut S,
        timer: &mut GenerationTimer<'_>,
    ) -> Result<Outcome> {
        for _ in 0..budget {
            if self.state.cancel_requested() {
                tracing::debug!(position = session.position(), "cancellation observed");
                return Ok(Outcome::Cancelled);
            }

            let token = match session.step().map_err(RunnerError::EngineExecution)? {
                StepOutput::Token(token) => token,
                StepOutput::EndOfSequence => {
                    tracing::debug!(position = session.position(), "end of sequence");
                    return Ok(Outcome::StoppedAtToken);
                }
            };

            if stop_set.contains(&token) {
                tracing::debug!(token, ?policy, "stop token");
                if policy == StopTokenPolicy::Deliver {
                    self.deliver(session, token, sink, timer)?;
                }
                return Ok(Outcome::StoppedAtToken);
            }

            self.deliver(session, token, sink, timer)?;
        }
        Ok(Outcome::Completed)
    }

    fn deliver<S: TokenSink + ?Sized>(
        &self,
        session: &mut Session<'_, E>,
        token: TokenId,
        sink: &mut S,
        timer: &mut GenerationTimer<'_>,
    ) -> Result<()> {
        let text = self.tokenizer.decode_token(token, session.decoding_mut())?;
        tracing::trace!(token, position = session.position(), text = %text, "token");
        sink.accept(&text).map_err(RunnerError::Callback)?;
        session.advance(token);
        timer.mark_token();
        Ok(())
    }
}

impl<E: ExecutionEngine, T: Tokenizer> fmt::Debug for Runner<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("state", &self.state.state())
            .finish_non_exhaustive()
    }
}
