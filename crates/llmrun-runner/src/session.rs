//! One generation's exclusive hold on the engine.

use llmrun_engine::{ExecutionEngine, PrefillResult, SamplingParams, StepOutput, TokenId};
use llmrun_tokenizer::DecodingState;
use uuid::Uuid;

use crate::state::StateCell;

/// Scope of a single `generate` call.
///
/// Opening a session resets the engine so prefill starts from an empty
/// cache. Dropping it resets the engine again and moves the runner back to
/// `Loaded`, whichever way the call ends: normal return, `?`, or a panic
/// unwinding out of a sink.
pub(crate) struct Session<'a, E: ExecutionEngine> {
    id: Uuid,
    engine: &'a mut E,
    state: &'a StateCell,
    /// Position of the next token to produce.
    position: usize,
    /// Tokens generated so far, in order.
    history: Vec<TokenId>,
    decoding: DecodingState,
}

impl<'a, E: ExecutionEngine> Session<'a, E> {
    /// The caller must already have moved `state` to `Generating`.
    pub(crate) fn open(engine: &'a mut E, state: &'a StateCell) -> Self {
        engine.reset();
        Self {
            id: Uuid::new_v4(),
            engine,
            state,
            position: 0,
            history: Vec::new(),
            decoding: DecodingState::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn engine(&self) -> &E {
        self.engine
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn generated(&self) -> &[TokenId] {
        &self.history
    }

    pub(crate) fn decoding_mut(&mut self) -> &mut DecodingState {
        &mut self.decoding
    }

    pub(crate) fn prefill(
        &mut self,
        prompt: &[TokenId],
        sampling: &SamplingParams,
    ) -> llmrun_engine::Result<PrefillResult> {
        let result = self.engine.prefill(prompt, sampling)?;
        self.position = prompt.len();
        Ok(result)
    }

    /// Ask the engine for the token at the current position.
    pub(crate) fn step(&mut self) -> llmrun_engine::Result<StepOutput> {
        self.engine.step(self.position)
    }

    /// Record a delivered token and move to the next position.
    pub(crate) fn advance(&mut self, token: TokenId) {
        self.history.push(token);
        self.position += 1;
    }
}

impl<E: ExecutionEngine> Drop for Session<'_, E> {
    fn drop(&mut self) {
        self.engine.reset();
        self.state.finish_generation();
    }
}
