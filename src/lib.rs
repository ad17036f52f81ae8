//! # llmrun
//!
//! Cancellable, streaming text generation on top of an opaque execution
//! engine.
//!
//! ```text
//! llmrun-engine      ExecutionEngine contract, TokenId, SamplingParams
//! llmrun-tokenizer   Tokenizer contract, DecodingState, reference tokenizers
//! llmrun-sampling    Reference sampler used inside engines
//! llmrun-runtime     ReferenceEngine and its context cache
//! llmrun-runner      Runner: lifecycle, decode loop, cancellation, sinks
//! ```
//!
//! ```no_run
//! use llmrun::runner::{CollectSink, GenerationConfig, Runner};
//! use llmrun::runtime::ReferenceEngine;
//! use llmrun::tokenizer::ByteTokenizer;
//!
//! let runner = Runner::new(ReferenceEngine::default(), ByteTokenizer::new());
//! runner.load()?;
//!
//! let mut sink = CollectSink::new();
//! let outcome = runner.generate("Once upon", &GenerationConfig::default(), &mut sink)?;
//! println!("{outcome}: {}", sink.text());
//! # Ok::<(), llmrun::runner::RunnerError>(())
//! ```

pub use llmrun_engine as engine;
pub use llmrun_runner as runner;
pub use llmrun_runtime as runtime;
pub use llmrun_sampling as sampling;
pub use llmrun_tokenizer as tokenizer;

pub use llmrun_engine::{ExecutionEngine, SamplingParams, TokenId};
pub use llmrun_runner::{
    GenerationConfig, Outcome, Runner, RunnerError, RunnerState, StopHandle, StopTokenPolicy,
    TokenSink,
};
pub use llmrun_tokenizer::Tokenizer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
