//! Text tokenization for the embedding pipelines
//!
//! Embedders only need "string → token ids / attention mask / type ids"
//! and single-id decoding, expressed by [`TextTokenizer`]. [`Tokenizer`]
//! implements it over HuggingFace's `tokenizers`, optionally truncating and
//! padding every encoding to a fixed length.

pub mod error;

use std::path::Path;
use tokenizers::{
    Encoding, PaddingParams, PaddingStrategy, Tokenizer as HfTokenizer, TruncationParams,
};

pub use error::{Result, TokenizationError};

/// Token sequences produced for one input string.
///
/// All three vectors have the same length. `attention_mask` or `type_ids`
/// may be empty when the tokenizer does not produce them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenEncoding {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub type_ids: Vec<u32>,
}

impl TokenEncoding {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<&Encoding> for TokenEncoding {
    fn from(encoding: &Encoding) -> Self {
        Self {
            ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            type_ids: encoding.get_type_ids().to_vec(),
        }
    }
}

/// What the embedding pipelines need from a tokenizer
pub trait TextTokenizer: Send {
    /// Encode `text` with special tokens added.
    fn encode(&self, text: &str) -> Result<TokenEncoding>;

    /// Decode token ids back to text.
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// Vocabulary size including added tokens, if known.
    fn vocab_size(&self) -> Option<usize>;
}

/// Tokenizer wrapper over a `tokenizer.json`
pub struct Tokenizer {
    inner: HfTokenizer,
    fixed_length: Option<usize>,
}

impl Tokenizer {
    /// Load tokenizer from file (tokenizer.json)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let inner = HfTokenizer::from_file(path)
            .map_err(|e| TokenizationError::LoadFailed(format!("{}: {}", path.display(), e)))?;

        log::debug!("Loaded tokenizer from {}", path.display());
        Ok(Self {
            inner,
            fixed_length: None,
        })
    }

    /// Truncate (right, longest-first) and pad every encoding to `length`.
    ///
    /// Padding uses the tokenizer's default pad id 0.
    pub fn with_fixed_length(mut self, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(TokenizationError::InvalidInput(
                "fixed length must be > 0".to_string(),
            ));
        }
        self.inner
            .with_truncation(Some(TruncationParams {
                max_length: length,
                ..Default::default()
            }))
            .map_err(|e| TokenizationError::ConfigFailed(e.to_string()))?;
        self.inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(length),
            ..Default::default()
        }));
        self.fixed_length = Some(length);
        Ok(self)
    }

    /// Length every encoding is padded/truncated to, if fixed.
    pub fn fixed_length(&self) -> Option<usize> {
        self.fixed_length
    }

    /// Vocabulary size including added tokens
    pub fn vocab_len(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextTokenizer for Tokenizer {
    fn encode(&self, text: &str) -> Result<TokenEncoding> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| TokenizationError::EncodeFailed(e.to_string()))?;
        Ok(TokenEncoding::from(&encoding))
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| TokenizationError::DecodeFailed(e.to_string()))
    }

    fn vocab_size(&self) -> Option<usize> {
        match self.vocab_len() {
            0 => None,
            n => Some(n),
        }
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_len())
            .field("fixed_length", &self.fixed_length)
            .finish()
    }
}
