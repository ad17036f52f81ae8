//! Byte-level tokenizer: one token per UTF-8 byte.

use crate::{DecodingState, TokenId, Tokenizer, TokenizerError, TokenizerResult};

/// Number of byte tokens.
const BYTE_VOCAB: usize = 256;

/// Tokenizer for models whose vocabulary is the 256 byte values.
///
/// Streaming decode buffers bytes until they form a complete character, so a
/// token may decode to the empty string. Bytes that can never become valid
/// UTF-8 are flushed as U+FFFD. A sequence that ends mid-character leaves
/// bytes in the [`DecodingState`]; [`DecodingState::flush`] turns them into
/// U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub fn new() -> Self {
        Self
    }

    fn byte(token: TokenId) -> TokenizerResult<u8> {
        u8::try_from(token).map_err(|_| TokenizerError::InvalidToken(token))
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>> {
        Ok(text.bytes().map(TokenId::from).collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String> {
        let bytes = tokens
            .iter()
            .map(|&t| Self::byte(t))
            .collect::<TokenizerResult<Vec<u8>>>()?;
        String::from_utf8(bytes).map_err(|e| TokenizerError::DecodingError(e.to_string()))
    }

    fn decode_token(&self, token: TokenId, state: &mut DecodingState) -> TokenizerResult<String> {
        let byte = Self::byte(token)?;
        state.pending_utf8.push(byte);

        let emitted = match std::str::from_utf8(&state.pending_utf8) {
            Ok(s) => s.to_string(),
            // Incomplete sequence: wait for more bytes.
            Err(e) if e.error_len().is_none() => return Ok(String::new()),
            Err(_) => String::from_utf8_lossy(&state.pending_utf8).into_owned(),
        };
        state.pending_utf8.clear();
        state.emit(&emitted);
        Ok(emitted)
    }

    fn vocab_size(&self) -> usize {
        BYTE_VOCAB
    }
}
