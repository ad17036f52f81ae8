//! Engine-held context cache.
//!
//! Records every position the engine has processed, up to a fixed capacity.
//! Prefill writes the whole prompt at once; each decode step appends one
//! token.
//!
//! # Invariants
//! - `len() <= capacity()` at all times
//! - Prefill only into an empty cache

use llmrun_engine::{EngineError, TokenId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("context cache capacity exceeded: {needed} > {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("cannot write prefill to non-empty cache (len={len}); clear it first")]
    NotEmpty { len: usize },
}

impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::CapacityExceeded { needed, capacity } => {
                EngineError::CapacityExceeded { needed, capacity }
            }
            other => EngineError::Execution(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextCache {
    tokens: Vec<TokenId>,
    capacity: usize,
}

impl ContextCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Write the prompt into an empty cache.
    pub fn write_prefill(&mut self, tokens: &[TokenId]) -> Result<(), CacheError> {
        if !self.tokens.is_empty() {
            return Err(CacheError::NotEmpty {
                len: self.tokens.len(),
            });
        }
        if tokens.len() > self.capacity {
            return Err(CacheError::CapacityExceeded {
                needed: tokens.len(),
                capacity: self.capacity,
            });
        }
        self.tokens.extend_from_slice(tokens);
        Ok(())
    }

    /// Append one decoded token.
    pub fn append_token(&mut self, token: TokenId) -> Result<(), CacheError> {
        if self.tokens.len() >= self.capacity {
            return Err(CacheError::CapacityExceeded {
                needed: self.tokens.len() + 1,
                capacity: self.capacity,
            });
        }
        self.tokens.push(token);
        Ok(())
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.tokens.len()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}
