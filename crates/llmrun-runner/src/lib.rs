//! # llmrun-runner
//!
//! The generation runner: owns an [`ExecutionEngine`](llmrun_engine::ExecutionEngine)
//! and a [`Tokenizer`](llmrun_tokenizer::Tokenizer), turns a prompt into a bounded
//! autoregressive decode loop, and streams decoded text to a [`TokenSink`].
//!
//! ```text
//! load ──► Loaded ──generate──► Generating ──(completed | cancelled | stop token | error)──► Loaded
//! ```
//!
//! - **Single flight.** One generation per runner. A second `generate` (or a
//!   `load`/`reset`) while one is running fails with [`RunnerError::Busy`] and
//!   leaves the running one untouched.
//! - **Cooperative cancellation.** [`Runner::stop`] and [`StopHandle::stop`]
//!   may be called from any thread. The loop observes them at the next step
//!   boundary; an in-flight engine step is never interrupted.
//! - **Streaming.** Each token is produced by the engine, decoded, and handed
//!   to the sink before the next step starts, in order, on the generating
//!   thread. Sinks must not block indefinitely: they run on the only thread
//!   driving decoding.

mod config;
mod error;
mod runner;
mod session;
mod sink;
mod state;
mod telemetry;

pub use config::{ConfigError, GenerationConfig, StopTokenPolicy};
pub use error::{Result, RunnerError};
pub use runner::{Outcome, Runner};
pub use sink::{from_fn, ChannelSink, CollectSink, DiscardSink, FnSink, SinkError, TokenSink};
pub use state::{RunnerState, StopHandle};
pub use telemetry::{GenerationStats, GenerationTimer, NoopTelemetry, RecordingTelemetry, TelemetryHook};
