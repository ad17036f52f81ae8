//! Error taxonomy for runner operations.

use llmrun_engine::EngineError;
use llmrun_tokenizer::TokenizerError;

use crate::sink::SinkError;

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Every way a runner operation can fail.
///
/// Failures inside `generate` never leave the runner `Generating`: the
/// session is torn down and the state is back to `Loaded` before the error
/// reaches the caller. Text already delivered to the sink stays delivered.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The engine could not initialize. Retry by calling `load` again.
    #[error("model load failed")]
    Load(#[source] EngineError),

    #[error("runner is not loaded")]
    NotLoaded,

    #[error("a generation is already in progress")]
    Busy,

    #[error("tokenization failed")]
    Tokenization(#[from] TokenizerError),

    /// Prefill or a decode step failed.
    #[error("engine execution failed")]
    EngineExecution(#[source] EngineError),

    /// The caller's sink rejected a token.
    #[error("token sink failed")]
    Callback(#[source] SinkError),

    #[error("prompt encoded to zero tokens")]
    EmptyPrompt,

    #[error("prompt of {prompt_tokens} tokens leaves no room in a context of {max_context_len}")]
    ContextOverflow {
        prompt_tokens: usize,
        max_context_len: usize,
    },
}

impl RunnerError {
    /// Whether the error comes from how the runner was called rather than
    /// from a collaborator.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RunnerError::NotLoaded | RunnerError::Busy | RunnerError::EmptyPrompt
        )
    }
}
