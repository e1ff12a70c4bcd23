//! Embedder configuration
//!
//! Both configs deserialize from JSON with every field optional; omitted
//! fields take the defaults below. Call `validate()` (or use
//! `from_json_str`, which does) before handing a config to an embedder.

use crate::error::{EmbeddingError, Result};
use crate::pooling::PoolingStrategy;
use crate::sparse::OutputLayout;
use ortbind_onnx_loader::SessionOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default token window length
pub const DEFAULT_SEQUENCE_LENGTH: usize = 256;
/// Default bound on cached per-batch-size sessions
pub const DEFAULT_MAX_CACHED_BATCH_SESSIONS: usize = 8;
/// Hidden width of all-MiniLM-L6-v2
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Dense (pooled transformer) embedder configuration
///
/// Defaults match all-MiniLM-L6-v2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseEmbedderConfig {
    /// Truncation and fixed padding length
    pub sequence_length: usize,
    pub max_cached_batch_sessions: usize,
    pub input_ids_name: String,
    pub attention_mask_name: String,
    /// Empty for models without a token type input
    pub token_type_ids_name: String,
    pub output_name: String,
    /// Hidden width of the model output
    pub embedding_dimension: usize,
    pub pooling: PoolingStrategy,
    pub l2_normalize: bool,
    pub session: SessionOptions,
}

impl Default for DenseEmbedderConfig {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            max_cached_batch_sessions: DEFAULT_MAX_CACHED_BATCH_SESSIONS,
            input_ids_name: "input_ids".to_string(),
            attention_mask_name: "attention_mask".to_string(),
            token_type_ids_name: "token_type_ids".to_string(),
            output_name: "last_hidden_state".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            pooling: PoolingStrategy::Mean,
            l2_normalize: true,
            session: SessionOptions::default(),
        }
    }
}

impl DenseEmbedderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sequence_length(mut self, length: usize) -> Self {
        self.sequence_length = length;
        self
    }

    pub fn with_max_cached_batch_sessions(mut self, limit: usize) -> Self {
        self.max_cached_batch_sessions = limit;
        self
    }

    /// Override model input/output names. An empty `token_type_ids` name
    /// disables that input.
    pub fn with_input_output_names(
        mut self,
        input_ids: impl Into<String>,
        attention_mask: impl Into<String>,
        token_type_ids: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.input_ids_name = input_ids.into();
        self.attention_mask_name = attention_mask.into();
        self.token_type_ids_name = token_type_ids.into();
        self.output_name = output.into();
        self
    }

    pub fn without_token_type_ids(mut self) -> Self {
        self.token_type_ids_name.clear();
        self
    }

    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingStrategy) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn with_l2_normalize(mut self, enabled: bool) -> Self {
        self.l2_normalize = enabled;
        self
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session = options;
        self
    }

    pub fn uses_token_type_ids(&self) -> bool {
        !self.token_type_ids_name.is_empty()
    }

    /// Model input names in binding order.
    pub fn input_names(&self) -> Vec<String> {
        input_names(
            &self.input_ids_name,
            &self.attention_mask_name,
            &self.token_type_ids_name,
        )
    }

    pub fn validate(&self) -> Result<()> {
        check_common(
            self.sequence_length,
            self.max_cached_batch_sessions,
            &self.input_ids_name,
            &self.attention_mask_name,
            &self.output_name,
        )?;
        if self.embedding_dimension == 0 {
            return Err(EmbeddingError::Config(
                "embedding dimension must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Text transform applied to each document before tokenization
#[derive(Clone)]
pub struct PreProcessor(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl PreProcessor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, document: &str) -> String {
        (self.0)(document)
    }
}

impl fmt::Debug for PreProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreProcessor(..)")
    }
}

impl PartialEq for PreProcessor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Sparse (SPLADE-style) embedder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseEmbedderConfig {
    pub sequence_length: usize,
    pub max_cached_batch_sessions: usize,
    pub input_ids_name: String,
    pub attention_mask_name: String,
    /// Empty for models without a token type input
    pub token_type_ids_name: String,
    pub output_name: String,
    /// 0 derives the size from the tokenizer
    pub vocab_size: usize,
    pub output_layout: OutputLayout,
    /// Dimensions with a value at or below this are dropped
    pub prune_threshold: f32,
    /// 0 keeps every dimension above the threshold
    pub top_k: usize,
    pub log1p_relu: bool,
    /// Attach decoded token strings to each sparse vector
    pub return_labels: bool,
    /// 0 disables sliding windows; otherwise windows start every `stride` tokens
    pub sliding_window_stride: usize,
    pub session: SessionOptions,
    #[serde(skip)]
    pub pre_processor: Option<PreProcessor>,
}

impl Default for SparseEmbedderConfig {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            max_cached_batch_sessions: DEFAULT_MAX_CACHED_BATCH_SESSIONS,
            input_ids_name: "input_ids".to_string(),
            attention_mask_name: "input_mask".to_string(),
            token_type_ids_name: "segment_ids".to_string(),
            output_name: "output".to_string(),
            vocab_size: 0,
            output_layout: OutputLayout::TokenLogits,
            prune_threshold: 0.0,
            top_k: 0,
            log1p_relu: true,
            return_labels: false,
            sliding_window_stride: 0,
            session: SessionOptions::default(),
            pre_processor: None,
        }
    }
}

impl SparseEmbedderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sequence_length(mut self, length: usize) -> Self {
        self.sequence_length = length;
        self
    }

    pub fn with_max_cached_batch_sessions(mut self, limit: usize) -> Self {
        self.max_cached_batch_sessions = limit;
        self
    }

    pub fn with_input_output_names(
        mut self,
        input_ids: impl Into<String>,
        attention_mask: impl Into<String>,
        token_type_ids: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.input_ids_name = input_ids.into();
        self.attention_mask_name = attention_mask.into();
        self.token_type_ids_name = token_type_ids.into();
        self.output_name = output.into();
        self
    }

    pub fn without_token_type_ids(mut self) -> Self {
        self.token_type_ids_name.clear();
        self
    }

    pub fn with_vocab_size(mut self, size: usize) -> Self {
        self.vocab_size = size;
        self
    }

    pub fn with_output_layout(mut self, layout: OutputLayout) -> Self {
        self.output_layout = layout;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f32) -> Self {
        self.prune_threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_log1p_relu(mut self, enabled: bool) -> Self {
        self.log1p_relu = enabled;
        self
    }

    pub fn with_return_labels(mut self, enabled: bool) -> Self {
        self.return_labels = enabled;
        self
    }

    pub fn with_sliding_window(mut self, stride: usize) -> Self {
        self.sliding_window_stride = stride;
        self
    }

    pub fn with_pre_processor<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.pre_processor = Some(PreProcessor::new(f));
        self
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session = options;
        self
    }

    pub fn uses_token_type_ids(&self) -> bool {
        !self.token_type_ids_name.is_empty()
    }

    pub fn uses_sliding_window(&self) -> bool {
        self.sliding_window_stride > 0
    }

    pub fn input_names(&self) -> Vec<String> {
        input_names(
            &self.input_ids_name,
            &self.attention_mask_name,
            &self.token_type_ids_name,
        )
    }

    pub fn validate(&self) -> Result<()> {
        check_common(
            self.sequence_length,
            self.max_cached_batch_sessions,
            &self.input_ids_name,
            &self.attention_mask_name,
            &self.output_name,
        )?;
        if self.prune_threshold.is_nan() || self.prune_threshold < 0.0 {
            return Err(EmbeddingError::Config(format!(
                "prune threshold must be >= 0, got {}",
                self.prune_threshold
            )));
        }
        if self.sliding_window_stride > self.sequence_length {
            return Err(EmbeddingError::Config(format!(
                "sliding window stride must be <= sequence length ({}), got {}",
                self.sequence_length, self.sliding_window_stride
            )));
        }
        Ok(())
    }
}

fn input_names(input_ids: &str, attention_mask: &str, token_type_ids: &str) -> Vec<String> {
    let mut names = vec![input_ids.to_string(), attention_mask.to_string()];
    if !token_type_ids.is_empty() {
        names.push(token_type_ids.to_string());
    }
    names
}

fn check_common(
    sequence_length: usize,
    max_cached: usize,
    input_ids: &str,
    attention_mask: &str,
    output: &str,
) -> Result<()> {
    if sequence_length == 0 {
        return Err(EmbeddingError::Config("sequence length must be > 0".to_string()));
    }
    if max_cached == 0 {
        return Err(EmbeddingError::Config(
            "max cached batch sessions must be > 0".to_string(),
        ));
    }
    if input_ids.is_empty() || attention_mask.is_empty() || output.is_empty() {
        return Err(EmbeddingError::Config(
            "input_ids, attention_mask, and output names cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_defaults() {
        let config = DenseEmbedderConfig::default();
        assert_eq!(config.sequence_length, 256);
        assert_eq!(config.embedding_dimension, 384);
        assert_eq!(config.pooling, PoolingStrategy::Mean);
        assert!(config.l2_normalize);
        assert_eq!(
            config.input_names(),
            vec!["input_ids", "attention_mask", "token_type_ids"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dense_without_token_types() {
        let config = DenseEmbedderConfig::default().without_token_type_ids();
        assert!(!config.uses_token_type_ids());
        assert_eq!(config.input_names().len(), 2);
    }

    #[test]
    fn test_dense_validation() {
        assert!(DenseEmbedderConfig::default().with_sequence_length(0).validate().is_err());
        assert!(DenseEmbedderConfig::default().with_embedding_dimension(0).validate().is_err());
        assert!(DenseEmbedderConfig::default()
            .with_max_cached_batch_sessions(0)
            .validate()
            .is_err());
        assert!(DenseEmbedderConfig::default()
            .with_input_output_names("ids", "", "", "out")
            .validate()
            .is_err());
    }

    #[test]
    fn test_dense_from_json_fills_defaults() {
        let config =
            DenseEmbedderConfig::from_json_str(r#"{"pooling": "cls", "l2_normalize": false}"#)
                .unwrap();
        assert_eq!(config.pooling, PoolingStrategy::Cls);
        assert!(!config.l2_normalize);
        assert_eq!(config.output_name, "last_hidden_state");

        let err = DenseEmbedderConfig::from_json_str(r#"{"sequence_length": 0}"#).unwrap_err();
        assert!(matches!(err, EmbeddingError::Config(_)));
        let err = DenseEmbedderConfig::from_json_str(r#"{"pooling": "max"}"#).unwrap_err();
        assert!(matches!(err, EmbeddingError::Json(_)));
    }

    #[test]
    fn test_sparse_defaults() {
        let config = SparseEmbedderConfig::default();
        assert_eq!(config.input_names(), vec!["input_ids", "input_mask", "segment_ids"]);
        assert_eq!(config.output_name, "output");
        assert_eq!(config.vocab_size, 0);
        assert_eq!(config.output_layout, OutputLayout::TokenLogits);
        assert!(config.log1p_relu);
        assert!(!config.uses_sliding_window());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sparse_validation() {
        assert!(SparseEmbedderConfig::default().with_prune_threshold(-0.1).validate().is_err());
        assert!(SparseEmbedderConfig::default()
            .with_prune_threshold(f32::NAN)
            .validate()
            .is_err());
        assert!(SparseEmbedderConfig::default()
            .with_sequence_length(8)
            .with_sliding_window(9)
            .validate()
            .is_err());
        assert!(SparseEmbedderConfig::default()
            .with_sequence_length(8)
            .with_sliding_window(8)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_sparse_from_json() {
        let config = SparseEmbedderConfig::from_json_str(
            r#"{"output_layout": "document_logits", "top_k": 16, "sliding_window_stride": 128}"#,
        )
        .unwrap();
        assert_eq!(config.output_layout, OutputLayout::DocumentLogits);
        assert_eq!(config.top_k, 16);
        assert!(config.uses_sliding_window());
        assert!(config.pre_processor.is_none());
    }

    #[test]
    fn test_pre_processor_applies() {
        let config = SparseEmbedderConfig::default().with_pre_processor(|s| s.to_uppercase());
        let pre = config.pre_processor.as_ref().unwrap();
        assert_eq!(pre.apply("abc"), "ABC");
        assert_eq!(format!("{:?}", pre), "PreProcessor(..)");
    }
}
