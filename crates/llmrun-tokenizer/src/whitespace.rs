//! Word-level reference tokenizer.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{DecodingState, TokenId, Tokenizer, TokenizerError, TokenizerResult};

/// Reference whitespace tokenizer.
///
/// - Splits on whitespace
/// - Bidirectional (encode/decode)
/// - Deterministic
/// - Assigns IDs in first-seen order, so a vocabulary can be fixed up front
///   with [`WhitespaceTokenizer::with_vocab`]
pub struct WhitespaceTokenizer {
    state: RwLock<VocabState>,
}

#[derive(Debug, Default)]
struct VocabState {
    vocab: HashMap<TokenId, String>,
    reverse_vocab: HashMap<String, TokenId>,
    next_id: TokenId,
}

impl VocabState {
    fn intern(&mut self, word: &str) -> TokenId {
        if let Some(id) = self.reverse_vocab.get(word) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.reverse_vocab.insert(word.to_string(), id);
        self.vocab.insert(id, word.to_string());
        id
    }
}

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(VocabState::default()),
        }
    }

    /// Create a tokenizer whose first IDs are `words`, in order.
    pub fn with_vocab<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = VocabState::default();
        for word in words {
            state.intern(word.as_ref());
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Look up the ID of a known word.
    pub fn token_id(&self, word: &str) -> Option<TokenId> {
        self.state.read().ok()?.reverse_vocab.get(word).copied()
    }

    fn decode_id(&self, token: TokenId) -> TokenizerResult<String> {
        let state = self
            .state
            .read()
            .map_err(|_| TokenizerError::DecodingError("tokenizer lock poisoned".to_string()))?;

        state
            .vocab
            .get(&token)
            .cloned()
            .ok_or(TokenizerError::InvalidToken(token))
    }
}

impl Default for WhitespaceTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>> {
        let mut state = self
            .state
            .write()
            .map_err(|_| TokenizerError::EncodingError("tokenizer lock poisoned".to_string()))?;

        Ok(text.split_whitespace().map(|w| state.intern(w)).collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String> {
        let words = tokens
            .iter()
            .map(|&id| self.decode_id(id))
            .collect::<TokenizerResult<Vec<_>>>()?;
        Ok(words.join(" "))
    }

    fn decode_token(&self, token: TokenId, state: &mut DecodingState) -> TokenizerResult<String> {
        let word = self.decode_id(token)?;
        let emitted = if state.emitted_any {
            format!(" {word}")
        } else {
            word
        };
        state.emit(&emitted);
        Ok(emitted)
    }

    fn vocab_size(&self) -> usize {
        self.state.read().map(|s| s.vocab.len()).unwrap_or(0)
    }
}
