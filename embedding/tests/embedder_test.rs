//! Embedder construction and lifecycle without a native runtime
//!
//! A fake tokenizer and an uninitialized environment cover everything that
//! happens before the first native call.

use ortbind_embedding::{
    DenseEmbedder, DenseEmbedderConfig, EmbeddingError, PoolingStrategy, SparseEmbedder,
    SparseEmbedderConfig,
};
use ortbind_onnx_loader::Environment;
use ortbind_tokenization::{TextTokenizer, TokenEncoding};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct WordTokenizer {
    vocab: Option<usize>,
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> ortbind_tokenization::Result<TokenEncoding> {
        let ids: Vec<u32> = text.split_whitespace().map(|w| w.len() as u32).collect();
        Ok(TokenEncoding {
            attention_mask: vec![1; ids.len()],
            type_ids: vec![0; ids.len()],
            ids,
        })
    }

    fn decode(&self, ids: &[u32], _skip: bool) -> ortbind_tokenization::Result<String> {
        Ok(ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" "))
    }

    fn vocab_size(&self) -> Option<usize> {
        self.vocab
    }
}

fn tokenizer(vocab: Option<usize>) -> Box<dyn TextTokenizer> {
    Box::new(WordTokenizer { vocab })
}

fn fake_model() -> (TempDir, PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("model.onnx");
    fs::write(&path, b"not really a model").expect("Failed to write model");
    (dir, path)
}

fn uninitialized() -> Arc<Environment> {
    Arc::new(Environment::new())
}

#[test]
fn test_dense_missing_files() {
    let (dir, model) = fake_model();
    let missing = dir.path().join("missing.onnx");

    let result = DenseEmbedder::with_tokenizer(
        uninitialized(),
        &missing,
        tokenizer(None),
        DenseEmbedderConfig::default(),
    );
    assert!(matches!(result, Err(EmbeddingError::FileNotFound(_))));

    let result = DenseEmbedder::new(
        uninitialized(),
        &model,
        dir.path().join("tokenizer.json"),
        DenseEmbedderConfig::default(),
    );
    assert!(matches!(result, Err(EmbeddingError::FileNotFound(_))));

    let result = DenseEmbedder::new(uninitialized(), "", "", DenseEmbedderConfig::default());
    assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
}

#[test]
fn test_dense_rejects_invalid_config() {
    let (_dir, model) = fake_model();
    let config = DenseEmbedderConfig::default().with_embedding_dimension(0);
    let result = DenseEmbedder::with_tokenizer(uninitialized(), &model, tokenizer(None), config);
    assert!(matches!(result, Err(EmbeddingError::Config(_))));
}

#[test]
fn test_dense_lifecycle_without_runtime() {
    let (_dir, model) = fake_model();
    let config = DenseEmbedderConfig::default().with_pooling(PoolingStrategy::None);
    let embedder =
        DenseEmbedder::with_tokenizer(uninitialized(), &model, tokenizer(None), config).unwrap();
    assert_eq!(embedder.output_dimension(), 256 * 384);

    let empty: [&str; 0] = [];
    assert!(embedder.embed_documents(&empty).unwrap().is_empty());

    let err = embedder.embed_query("hello").unwrap_err();
    assert!(matches!(err, EmbeddingError::RuntimeNotInitialized));
    assert!(embedder.cached_batch_sizes().is_empty());

    embedder.close().unwrap();
    assert!(embedder.is_closed());
    let err = embedder.embed_documents(&["hello"]).unwrap_err();
    assert!(matches!(err, EmbeddingError::Closed));
    embedder.close().unwrap();
}

#[test]
fn test_sparse_derives_vocab_size() {
    let (_dir, model) = fake_model();
    let embedder = SparseEmbedder::with_tokenizer(
        uninitialized(),
        &model,
        tokenizer(Some(30522)),
        SparseEmbedderConfig::default(),
    )
    .unwrap();
    assert_eq!(embedder.vocab_size(), 30522);

    let embedder = SparseEmbedder::with_tokenizer(
        uninitialized(),
        &model,
        tokenizer(Some(30522)),
        SparseEmbedderConfig::default().with_vocab_size(100),
    )
    .unwrap();
    assert_eq!(embedder.vocab_size(), 100);
}

#[test]
fn test_sparse_unknown_vocab_size_fails() {
    let (_dir, model) = fake_model();
    let result = SparseEmbedder::with_tokenizer(
        uninitialized(),
        &model,
        tokenizer(None),
        SparseEmbedderConfig::default(),
    );
    assert!(matches!(result, Err(EmbeddingError::Config(_))));

    let result = SparseEmbedder::with_tokenizer(
        uninitialized(),
        &model,
        tokenizer(Some(0)),
        SparseEmbedderConfig::default(),
    );
    assert!(matches!(result, Err(EmbeddingError::Config(m)) if m.contains("zero")));
}

#[test]
fn test_sparse_rejects_stride_longer_than_sequence() {
    let (_dir, model) = fake_model();
    let config = SparseEmbedderConfig::default()
        .with_sequence_length(16)
        .with_sliding_window(32);
    let result = SparseEmbedder::with_tokenizer(uninitialized(), &model, tokenizer(Some(10)), config);
    assert!(matches!(result, Err(EmbeddingError::Config(_))));
}

#[test]
fn test_sparse_lifecycle_without_runtime() {
    let (_dir, model) = fake_model();
    let config = SparseEmbedderConfig::default()
        .with_sliding_window(128)
        .with_return_labels(true)
        .with_pre_processor(|s| s.to_lowercase());
    let embedder =
        SparseEmbedder::with_tokenizer(uninitialized(), &model, tokenizer(Some(64)), config)
            .unwrap();

    let empty: Vec<String> = Vec::new();
    assert!(embedder.embed_documents(&empty).unwrap().is_empty());

    let err = embedder.embed_query("Hello").unwrap_err();
    assert!(matches!(err, EmbeddingError::RuntimeNotInitialized));

    embedder.close().unwrap();
    let err = embedder.embed_query("Hello").unwrap_err();
    assert!(matches!(err, EmbeddingError::Closed));
    assert!(embedder.is_closed());
}

#[test]
fn test_embedders_are_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DenseEmbedder>();
    assert_send_sync::<SparseEmbedder>();
}
