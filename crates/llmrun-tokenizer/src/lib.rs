//! # llmrun-tokenizer
//!
//! Deterministic tokenization for llmrun.
//!
//! This crate provides:
//! - A [`Tokenizer`] trait for pluggable tokenization backends
//! - [`WhitespaceTokenizer`], a word-level reference tokenizer for tests
//! - [`ByteTokenizer`], a UTF-8 byte tokenizer for byte-vocabulary models
//! - Streaming decoding through [`DecodingState`], which holds back partial
//!   UTF-8 sequences until they complete

mod byte;
mod whitespace;

pub use byte::ByteTokenizer;
pub use llmrun_engine::TokenId;
pub use whitespace::WhitespaceTokenizer;

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("Invalid token ID: {0}")]
    InvalidToken(TokenId),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Decoding error: {0}")]
    DecodingError(String),
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

/// Core tokenizer trait. Implementations can be swapped without changing app code.
///
/// Implementations must be deterministic: the same input always yields the
/// same output, and decoding never changes what a later encode returns for
/// text seen before.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of token IDs.
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>>;

    /// Decode a complete sequence of tokens into text.
    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String>;

    /// Decode a single token and accumulate with partial UTF-8 state.
    /// For streaming decoding, this allows emitting printable characters immediately.
    fn decode_token(&self, token: TokenId, state: &mut DecodingState) -> TokenizerResult<String>;

    /// Get vocabulary size.
    fn vocab_size(&self) -> usize;
}

impl<T: Tokenizer + ?Sized> Tokenizer for std::sync::Arc<T> {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>> {
        (**self).encode(text)
    }

    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String> {
        (**self).decode(tokens)
    }

    fn decode_token(&self, token: TokenId, state: &mut DecodingState) -> TokenizerResult<String> {
        (**self).decode_token(token, state)
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

/// Streaming decoding state for handling partial UTF-8 sequences.
///
/// One state belongs to one generated sequence; it must not be shared
/// between sequences.
#[derive(Debug, Clone, Default)]
pub struct DecodingState {
    buffer: String,
    pending_utf8: Vec<u8>,
    emitted_any: bool,
}

impl DecodingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Bytes received but not yet forming a complete character.
    pub fn pending_bytes(&self) -> usize {
        self.pending_utf8.len()
    }

    /// Emit whatever bytes are still pending, invalid sequences as U+FFFD.
    ///
    /// Call once the sequence has ended; returns an empty string when
    /// nothing is pending.
    pub fn flush(&mut self) -> String {
        if self.pending_utf8.is_empty() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&self.pending_utf8).into_owned();
        self.pending_utf8.clear();
        self.emit(&text);
        text
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending_utf8.clear();
        self.emitted_any = false;
    }

    fn emit(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.emitted_any = true;
    }
}
