//! Sparse (SPLADE-style) embeddings
//!
//! Two modes:
//! - fixed window: every document is truncated/padded to the sequence
//!   length and the batch runs once;
//! - sliding window: each document is split into overlapping windows run as
//!   one batch per document, and the per-window vectors are max-merged.

use crate::cache::BatchSessionCache;
use crate::config::{PreProcessor, SparseEmbedderConfig};
use crate::encoder::{check_file, encode_all, runtime_of, ModelBinding, SessionBundle};
use crate::error::{EmbeddingError, Result};
use crate::sparse::{merge_windows, sparsify, OutputLayout, SparseVector, SparsifyParams};
use crate::windows::split_into_windows;
use ortbind_onnx_loader::{Environment, Runtime};
use ortbind_tokenization::{TextTokenizer, Tokenizer};
use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

/// Sparse text embedder over an ONNX masked-language model
pub struct SparseEmbedder {
    environment: Arc<Environment>,
    binding: ModelBinding,
    vocab_size: usize,
    params: SparsifyParams,
    return_labels: bool,
    /// 0 when sliding windows are disabled
    sliding_window_stride: usize,
    pre_processor: Option<PreProcessor>,
    state: Mutex<SparseState>,
}

struct SparseState {
    tokenizer: Option<Box<dyn TextTokenizer>>,
    sessions: BatchSessionCache<SessionBundle>,
    /// Decoded token strings by vocabulary id
    labels: HashMap<usize, String>,
}

impl SparseEmbedder {
    /// Load the tokenizer from `tokenizer_path` and prepare to run
    /// `model_path`.
    ///
    /// In fixed-window mode the tokenizer truncates and pads to the sequence
    /// length; with a sliding window it returns full-length encodings.
    pub fn new(
        environment: Arc<Environment>,
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: SparseEmbedderConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();
        check_file(model_path, "model")?;
        check_file(tokenizer_path, "tokenizer")?;
        config.validate()?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::from(e).context("failed to load tokenizer"))?;
        if !config.uses_sliding_window() {
            tokenizer = tokenizer
                .with_fixed_length(config.sequence_length)
                .map_err(|e| EmbeddingError::from(e).context("failed to load tokenizer"))?;
        }

        Self::with_tokenizer(environment, model_path, Box::new(tokenizer), config)
    }

    /// Use a caller-supplied tokenizer.
    ///
    /// A zero `vocab_size` in `config` is replaced by the tokenizer's
    /// vocabulary size; if that is unknown the tokenizer is dropped and an
    /// error returned.
    pub fn with_tokenizer(
        environment: Arc<Environment>,
        model_path: impl AsRef<Path>,
        tokenizer: Box<dyn TextTokenizer>,
        config: SparseEmbedderConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        check_file(model_path, "model")?;
        config.validate()?;

        let vocab_size = match config.vocab_size {
            0 => match tokenizer.vocab_size() {
                Some(0) => {
                    return Err(EmbeddingError::Config(
                        "derived vocabulary size is zero".to_string(),
                    ))
                }
                Some(n) => n,
                None => {
                    return Err(EmbeddingError::Config(
                        "failed to derive vocabulary size from tokenizer".to_string(),
                    ))
                }
            },
            n => n,
        };

        let binding = ModelBinding {
            model_path: model_path.to_path_buf(),
            input_names: config.input_names(),
            output_name: config.output_name.clone(),
            sequence_length: config.sequence_length,
            options: config.session.clone(),
        };
        let sessions = BatchSessionCache::new(config.max_cached_batch_sessions)?;

        log::info!(
            "Sparse embedder ready: model={} seq={} vocab={} layout={} stride={}",
            model_path.display(),
            config.sequence_length,
            vocab_size,
            config.output_layout,
            config.sliding_window_stride
        );

        Ok(Self {
            environment,
            binding,
            vocab_size,
            params: SparsifyParams {
                layout: config.output_layout,
                prune_threshold: config.prune_threshold,
                top_k: config.top_k,
                log1p_relu: config.log1p_relu,
            },
            return_labels: config.return_labels,
            sliding_window_stride: config.sliding_window_stride,
            pre_processor: config.pre_processor,
            state: Mutex::new(SparseState {
                tokenizer: Some(tokenizer),
                sessions,
                labels: HashMap::new(),
            }),
        })
    }

    /// Embed `documents`, one sparse vector per document.
    pub fn embed_documents<S: AsRef<str>>(&self, documents: &[S]) -> Result<Vec<SparseVector>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tokenizer = state.tokenizer.as_deref().ok_or(EmbeddingError::Closed)?;
        let runtime = runtime_of(&self.environment)?;

        let documents = preprocess(self.pre_processor.as_ref(), documents)?;
        let mut vectors = if self.sliding_window_stride > 0 {
            self.embed_sliding(tokenizer, &mut state.sessions, &runtime, &documents)?
        } else {
            self.embed_fixed(tokenizer, &mut state.sessions, &runtime, &documents)?
        };

        if self.return_labels {
            attach_labels(tokenizer, &mut state.labels, &mut vectors)?;
        }
        Ok(vectors)
    }

    /// Embed a single query.
    pub fn embed_query(&self, query: &str) -> Result<SparseVector> {
        let mut vectors = self.embed_documents(&[query])?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::InvalidInput(format!(
                "unexpected embedding row count: got {}, want 1",
                vectors.len()
            )));
        }
        Ok(vectors.swap_remove(0))
    }

    /// Release cached sessions, labels and the tokenizer. Later embed calls
    /// fail with [`EmbeddingError::Closed`]; closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = state.sessions.close();
        state.labels.clear();
        if state.tokenizer.take().is_some() {
            log::info!("Sparse embedder closed: {}", self.binding.model_path.display());
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().tokenizer.is_none()
    }

    /// Configured or tokenizer-derived vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn output_layout(&self) -> OutputLayout {
        self.params.layout
    }

    pub fn sequence_length(&self) -> usize {
        self.binding.sequence_length
    }

    pub fn cached_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().sessions.cached_batch_sizes()
    }

    fn output_dims(&self, batch: usize) -> Vec<i64> {
        self.params
            .layout
            .output_shape(batch, self.binding.sequence_length, self.vocab_size)
    }

    fn embed_fixed(
        &self,
        tokenizer: &dyn TextTokenizer,
        sessions: &mut BatchSessionCache<SessionBundle>,
        runtime: &Arc<Runtime>,
        documents: &[Cow<'_, str>],
    ) -> Result<Vec<SparseVector>> {
        let encodings = encode_all(tokenizer, documents)?;
        let batch_size = documents.len();

        let bundle = sessions.acquire(batch_size, |batch| {
            SessionBundle::create(runtime, &self.binding, batch, self.output_dims(batch))
        })?;
        bundle.fill_encodings(&encodings)?;
        bundle
            .run()
            .map_err(|e| e.context("sparse embedding inference failed"))?;

        sparsify(
            bundle.output(),
            bundle.attention_mask(),
            batch_size,
            self.binding.sequence_length,
            self.vocab_size,
            &self.params,
        )
    }

    fn embed_sliding(
        &self,
        tokenizer: &dyn TextTokenizer,
        sessions: &mut BatchSessionCache<SessionBundle>,
        runtime: &Arc<Runtime>,
        documents: &[Cow<'_, str>],
    ) -> Result<Vec<SparseVector>> {
        let sequence_length = self.binding.sequence_length;
        // Merge sees every positive dimension; pruning happens once, after.
        let window_params = SparsifyParams {
            prune_threshold: 0.0,
            top_k: 0,
            ..self.params
        };

        let mut vectors = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            let windows = tokenizer
                .encode(document)
                .map_err(EmbeddingError::from)
                .and_then(|encoding| {
                    split_into_windows(
                        &encoding,
                        sequence_length,
                        self.sliding_window_stride,
                        self.binding.uses_token_type_ids(),
                    )
                })
                .map_err(|e| {
                    e.context(format!(
                        "failed to tokenize sliding windows for document {}",
                        index
                    ))
                })?;
            let window_count = windows.len();
            log::trace!("Document {} split into {} windows", index, window_count);

            let bundle = sessions.acquire(window_count, |batch| {
                SessionBundle::create(runtime, &self.binding, batch, self.output_dims(batch))
            })?;
            bundle.fill_windows(&windows).map_err(|e| {
                e.context(format!(
                    "failed to prepare sliding window tensors for document {}",
                    index
                ))
            })?;
            bundle
                .run()
                .map_err(|e| e.context("sparse embedding inference failed"))?;

            let per_window = sparsify(
                bundle.output(),
                bundle.attention_mask(),
                window_count,
                sequence_length,
                self.vocab_size,
                &window_params,
            )?;
            let merged = merge_windows(&per_window, self.params.prune_threshold, self.params.top_k)
                .map_err(|e| {
                    e.context(format!(
                        "failed to merge sliding window embeddings for document {}",
                        index
                    ))
                })?;
            vectors.push(merged);
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for SparseEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseEmbedder")
            .field("model_path", &self.binding.model_path)
            .field("sequence_length", &self.binding.sequence_length)
            .field("vocab_size", &self.vocab_size)
            .field("params", &self.params)
            .field("return_labels", &self.return_labels)
            .field("sliding_window_stride", &self.sliding_window_stride)
            .finish()
    }
}

/// Apply the pre-processor to every document, turning a panic into an
/// error that names the document.
fn preprocess<'a, S: AsRef<str>>(
    pre_processor: Option<&PreProcessor>,
    documents: &'a [S],
) -> Result<Vec<Cow<'a, str>>> {
    let Some(pre_processor) = pre_processor else {
        return Ok(documents.iter().map(|d| Cow::Borrowed(d.as_ref())).collect());
    };
    documents
        .iter()
        .enumerate()
        .map(|(index, document)| {
            panic::catch_unwind(AssertUnwindSafe(|| pre_processor.apply(document.as_ref())))
                .map(Cow::Owned)
                .map_err(|payload| EmbeddingError::PreProcessorPanic {
                    index,
                    message: panic_message(payload.as_ref()),
                })
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Decode each kept index to its token string, memoized in `cache`.
fn attach_labels(
    tokenizer: &dyn TextTokenizer,
    cache: &mut HashMap<usize, String>,
    vectors: &mut [SparseVector],
) -> Result<()> {
    for vector in vectors.iter_mut() {
        if vector.indices.is_empty() {
            continue;
        }
        let mut labels = Vec::with_capacity(vector.indices.len());
        for &index in &vector.indices {
            if let Some(label) = cache.get(&index) {
                labels.push(label.clone());
                continue;
            }
            let id = u32::try_from(index).map_err(|_| {
                EmbeddingError::InvalidInput(format!("sparse index {} is out of u32 range", index))
            })?;
            let label = tokenizer.decode(&[id], false).map_err(|e| {
                EmbeddingError::from(e).context(format!("failed to decode sparse index {}", index))
            })?;
            cache.insert(index, label.clone());
            labels.push(label);
        }
        vector.labels = Some(labels);
    }
    Ok(())
}
