//! Dense sentence embeddings (all-MiniLM-L6-v2 style)
//!
//! Documents are tokenized to a fixed length, run through the model in one
//! batch, and the `[batch, sequence, hidden]` output is pooled per row.

use crate::cache::BatchSessionCache;
use crate::config::DenseEmbedderConfig;
use crate::encoder::{check_file, dims, encode_all, runtime_of, ModelBinding, SessionBundle};
use crate::error::{EmbeddingError, Result};
use crate::pooling::{pool, PoolingStrategy};
use ortbind_onnx_loader::Environment;
use ortbind_tokenization::{TextTokenizer, Tokenizer};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Dense text embedder over an ONNX transformer model
///
/// The environment must be initialized before embedding; the embedder does
/// not hold a reference on it. Calls on one instance are serialized.
pub struct DenseEmbedder {
    environment: Arc<Environment>,
    binding: ModelBinding,
    embedding_dimension: usize,
    pooling: PoolingStrategy,
    l2_normalize: bool,
    state: Mutex<DenseState>,
}

struct DenseState {
    /// `None` once closed
    tokenizer: Option<Box<dyn TextTokenizer>>,
    sessions: BatchSessionCache<SessionBundle>,
}

impl DenseEmbedder {
    /// Load the tokenizer from `tokenizer_path` (truncating and padding to
    /// the configured sequence length) and prepare to run `model_path`.
    pub fn new(
        environment: Arc<Environment>,
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: DenseEmbedderConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();
        check_file(model_path, "model")?;
        check_file(tokenizer_path, "tokenizer")?;
        config.validate()?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .and_then(|t| t.with_fixed_length(config.sequence_length))
            .map_err(|e| EmbeddingError::from(e).context("failed to load tokenizer"))?;

        Self::with_tokenizer(environment, model_path, Box::new(tokenizer), config)
    }

    /// Use a caller-supplied tokenizer. Encodings longer than the sequence
    /// length are truncated and shorter ones zero-padded.
    pub fn with_tokenizer(
        environment: Arc<Environment>,
        model_path: impl AsRef<Path>,
        tokenizer: Box<dyn TextTokenizer>,
        config: DenseEmbedderConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        check_file(model_path, "model")?;
        config.validate()?;

        let binding = ModelBinding {
            model_path: model_path.to_path_buf(),
            input_names: config.input_names(),
            output_name: config.output_name.clone(),
            sequence_length: config.sequence_length,
            options: config.session.clone(),
        };
        let sessions = BatchSessionCache::new(config.max_cached_batch_sessions)?;

        log::info!(
            "Dense embedder ready: model={} seq={} dim={} pooling={}",
            model_path.display(),
            config.sequence_length,
            config.embedding_dimension,
            config.pooling
        );

        Ok(Self {
            environment,
            binding,
            embedding_dimension: config.embedding_dimension,
            pooling: config.pooling,
            l2_normalize: config.l2_normalize,
            state: Mutex::new(DenseState {
                tokenizer: Some(tokenizer),
                sessions,
            }),
        })
    }

    /// Embed `documents` in one batch, one vector per document.
    pub fn embed_documents<S: AsRef<str>>(&self, documents: &[S]) -> Result<Vec<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tokenizer = state.tokenizer.as_deref().ok_or(EmbeddingError::Closed)?;
        let runtime = runtime_of(&self.environment)?;

        let encodings = encode_all(tokenizer, documents)?;
        let batch_size = documents.len();
        let sequence_length = self.binding.sequence_length;
        let hidden = self.embedding_dimension;
        let binding = &self.binding;

        let bundle = state.sessions.acquire(batch_size, |batch| {
            let output_dims = dims(&[batch, sequence_length, hidden])?;
            SessionBundle::create(&runtime, binding, batch, output_dims)
        })?;
        bundle.fill_encodings(&encodings)?;
        bundle
            .run()
            .map_err(|e| e.context("embedding inference failed"))?;

        pool(
            bundle.output(),
            bundle.attention_mask(),
            batch_size,
            sequence_length,
            hidden,
            self.pooling,
            self.l2_normalize,
        )
    }

    /// Embed a single query.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut rows = self.embed_documents(&[query])?;
        if rows.len() != 1 {
            return Err(EmbeddingError::InvalidInput(format!(
                "unexpected embedding row count: got {}, want 1",
                rows.len()
            )));
        }
        Ok(rows.swap_remove(0))
    }

    /// Release cached sessions and the tokenizer. Later embed calls fail
    /// with [`EmbeddingError::Closed`]; closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = state.sessions.close();
        if state.tokenizer.take().is_some() {
            log::info!("Dense embedder closed: {}", self.binding.model_path.display());
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().tokenizer.is_none()
    }

    /// Length of each returned vector.
    pub fn output_dimension(&self) -> usize {
        self.pooling
            .output_dimension(self.binding.sequence_length, self.embedding_dimension)
    }

    pub fn sequence_length(&self) -> usize {
        self.binding.sequence_length
    }

    pub fn pooling(&self) -> PoolingStrategy {
        self.pooling
    }

    /// Batch sizes with a live session, least recently used first.
    pub fn cached_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().sessions.cached_batch_sizes()
    }
}

impl std::fmt::Debug for DenseEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseEmbedder")
            .field("model_path", &self.binding.model_path)
            .field("sequence_length", &self.binding.sequence_length)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("pooling", &self.pooling)
            .field("l2_normalize", &self.l2_normalize)
            .finish()
    }
}
