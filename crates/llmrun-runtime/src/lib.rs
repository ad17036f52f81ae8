//! # llmrun-runtime
//!
//! A small, deterministic CPU implementation of
//! [`ExecutionEngine`](llmrun_engine::ExecutionEngine). It stands in for a real
//! tensor backend in the CLI demo and in end-to-end tests: weights come from a
//! fixed seed, logits come from a decayed bag of recent token embeddings, and
//! the engine-held [`ContextCache`] enforces a context window the same way a
//! preallocated KV cache would.

mod cache;
mod reference;

pub use cache::{CacheError, ContextCache};
pub use reference::{ReferenceConfig, ReferenceEngine};
