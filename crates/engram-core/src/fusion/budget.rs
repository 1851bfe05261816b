//! Token counting for the context budget
//!
//! Uses the cl100k_base BPE so budget arithmetic matches what a
//! downstream model will actually see, rather than a character
//! heuristic.

use tiktoken_rs::CoreBPE;

use crate::error::{EngramError, Result};

/// Token counter backed by the cl100k_base encoding. Construction is
/// expensive; build once and share.
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    /// Load the encoding
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| EngramError::Internal(format!("tokenizer init failed: {e}")))?;
        Ok(Self { bpe })
    }

    /// Number of tokens in `text`
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}
