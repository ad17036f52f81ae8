//! Runner state and the cancellation signal, packed into one atomic word.
//!
//! ```text
//!  bit 2     bits 1..0
//! [cancel] [  state  ]      state: 0 = Unloaded, 1 = Loaded, 2 = Generating
//! ```
//!
//! Entering `Generating` is a single compare-exchange from a clean `Loaded`
//! word, which clears the cancel bit in the same step. A stop request can only
//! set the cancel bit while the word says `Generating`, so it can neither leak
//! into the next generation nor be lost between the state change and a
//! separate reset. The generating thread reads the bit with acquire ordering
//! at each step boundary; nothing here ever blocks.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::RunnerError;

const STATE_MASK: u8 = 0b011;
const CANCEL: u8 = 0b100;

const UNLOADED: u8 = 0;
const LOADED: u8 = 1;
const GENERATING: u8 = 2;

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    Unloaded,
    Loaded,
    Generating,
}

impl RunnerState {
    fn from_word(word: u8) -> Self {
        match word & STATE_MASK {
            LOADED => RunnerState::Loaded,
            GENERATING => RunnerState::Generating,
            _ => RunnerState::Unloaded,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Unloaded => write!(f, "unloaded"),
            RunnerState::Loaded => write!(f, "loaded"),
            RunnerState::Generating => write!(f, "generating"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell {
    word: AtomicU8,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            word: AtomicU8::new(UNLOADED),
        }
    }

    pub(crate) fn state(&self) -> RunnerState {
        RunnerState::from_word(self.word.load(Ordering::Acquire))
    }

    /// `Unloaded -> Loaded`. No effect in any other state.
    pub(crate) fn mark_loaded(&self) {
        let _ = self
            .word
            .compare_exchange(UNLOADED, LOADED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// `Loaded -> Generating` with the cancel bit cleared.
    pub(crate) fn begin_generation(&self) -> Result<(), RunnerError> {
        self.word
            .compare_exchange(LOADED, GENERATING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| match RunnerState::from_word(actual) {
                RunnerState::Unloaded => RunnerError::NotLoaded,
                _ => RunnerError::Busy,
            })
    }

    /// `Generating -> Loaded`, dropping any pending cancel request.
    pub(crate) fn finish_generation(&self) {
        self.word.store(LOADED, Ordering::Release);
    }

    /// Set the cancel bit if a generation is running and it is not yet set.
    /// Returns whether this call set it.
    pub(crate) fn request_cancel(&self) -> bool {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (word & STATE_MASK == GENERATING && word & CANCEL == 0).then_some(word | CANCEL)
            })
            .is_ok()
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.word.load(Ordering::Acquire) & CANCEL != 0
    }

    /// Take the runner out of `Loaded` for maintenance work. Fails like
    /// [`begin_generation`](Self::begin_generation); the runner reads as
    /// `Generating` until the claim drops.
    pub(crate) fn claim(&self) -> Result<Claim<'_>, RunnerError> {
        self.begin_generation()?;
        Ok(Claim { cell: self })
    }
}

/// Exclusive hold on a loaded runner. Returns it to `Loaded` on drop.
pub(crate) struct Claim<'a> {
    cell: &'a StateCell,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.cell.finish_generation();
    }
}

/// Cloneable handle that cancels the owning runner's generation from any
/// thread.
///
/// Has an effect only while a generation is in flight; otherwise `stop` is a
/// no-op. Repeated stops within one generation are no-ops too.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cell: Arc<StateCell>,
}

impl StopHandle {
    pub(crate) fn new(cell: Arc<StateCell>) -> Self {
        Self { cell }
    }

    /// Request cancellation at the next step boundary.
    pub fn stop(&self) {
        if self.cell.request_cancel() {
            tracing::debug!("cancellation requested");
        }
    }

    pub fn is_generating(&self) -> bool {
        self.cell.state() == RunnerState::Generating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unloaded() {
        let cell = StateCell::new();
        assert_eq!(cell.state(), RunnerState::Unloaded);
        assert!(!cell.cancel_requested());
    }

    #[test]
    fn begin_requires_loaded() {
        let cell = StateCell::new();
        assert!(matches!(cell.begin_generation(), Err(RunnerError::NotLoaded)));
        cell.mark_loaded();
        cell.begin_generation().unwrap();
        assert_eq!(cell.state(), RunnerState::Generating);
        assert!(matches!(cell.begin_generation(), Err(RunnerError::Busy)));
    }

    #[test]
    fn busy_even_after_cancel_requested() {
        let cell = StateCell::new();
        cell.mark_loaded();
        cell.begin_generation().unwrap();
        assert!(cell.request_cancel());
        assert!(matches!(cell.begin_generation(), Err(RunnerError::Busy)));
        assert!(cell.cancel_requested());
    }

    #[test]
    fn cancel_only_while_generating() {
        let cell = StateCell::new();
        assert!(!cell.request_cancel());
        cell.mark_loaded();
        assert!(!cell.request_cancel());
        assert!(!cell.cancel_requested());

        cell.begin_generation().unwrap();
        assert!(cell.request_cancel());
        assert!(!cell.request_cancel(), "second stop is a no-op");
        assert!(cell.cancel_requested());
    }

    #[test]
    fn finishing_clears_cancel_for_next_generation() {
        let cell = StateCell::new();
        cell.mark_loaded();
        cell.begin_generation().unwrap();
        cell.request_cancel();
        cell.finish_generation();
        assert_eq!(cell.state(), RunnerState::Loaded);
        assert!(!cell.cancel_requested());

        cell.begin_generation().unwrap();
        assert!(!cell.cancel_requested());
    }

    #[test]
    fn mark_loaded_does_not_disturb_generation() {
        let cell = StateCell::new();
        cell.mark_loaded();
        cell.begin_generation().unwrap();
        cell.mark_loaded();
        assert_eq!(cell.state(), RunnerState::Generating);
    }

    #[test]
    fn claim_excludes_generation_until_dropped() {
        let cell = StateCell::new();
        assert!(matches!(cell.claim(), Err(RunnerError::NotLoaded)));
        cell.mark_loaded();
        {
            let _claim = cell.claim().unwrap();
            assert!(matches!(cell.begin_generation(), Err(RunnerError::Busy)));
            assert!(matches!(cell.claim(), Err(RunnerError::Busy)));
        }
        assert_eq!(cell.state(), RunnerState::Loaded);
        cell.begin_generation().unwrap();
    }

    #[test]
    fn stop_handle_shares_cell() {
        let cell = Arc::new(StateCell::new());
        let handle = StopHandle::new(Arc::clone(&cell));
        assert!(!handle.is_generating());
        handle.stop();

        cell.mark_loaded();
        cell.begin_generation().unwrap();
        assert!(handle.is_generating());
        handle.clone().stop();
        assert!(cell.cancel_requested());
    }

    #[test]
    fn state_display() {
        assert_eq!(RunnerState::Generating.to_string(), "generating");
    }
}
