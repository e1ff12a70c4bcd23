//! Dense and sparse text embeddings over ONNX Runtime
//!
//! [`DenseEmbedder`] pools transformer hidden states into one vector per
//! document. [`SparseEmbedder`] turns masked-language-model logits into
//! pruned [`SparseVector`]s, optionally over sliding windows for long
//! documents.
//!
//! Both keep one inference session per batch size, bounded by an LRU
//! [`BatchSessionCache`].
//!
//! ```no_run
//! use ortbind_embedding::{DenseEmbedder, DenseEmbedderConfig};
//! use ortbind_onnx_loader::Environment;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let env = Environment::global();
//! env.set_library_path("/opt/onnxruntime/lib/libonnxruntime.so")?;
//! env.initialize()?;
//!
//! let embedder = DenseEmbedder::new(
//!     env.clone(),
//!     "all-MiniLM-L6-v2/model.onnx",
//!     "all-MiniLM-L6-v2/tokenizer.json",
//!     DenseEmbedderConfig::default(),
//! )?;
//! let vectors = embedder.embed_documents(&["hello world", "sparse and dense"])?;
//! assert_eq!(vectors[0].len(), 384);
//!
//! embedder.close()?;
//! env.destroy()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dense;
mod encoder;
pub mod error;
pub mod pooling;
pub mod sparse;
pub mod splade;
pub mod windows;

pub use cache::{BatchSessionCache, CachedResource};
pub use config::{
    DenseEmbedderConfig, PreProcessor, SparseEmbedderConfig, DEFAULT_EMBEDDING_DIMENSION,
    DEFAULT_MAX_CACHED_BATCH_SESSIONS, DEFAULT_SEQUENCE_LENGTH,
};
pub use dense::DenseEmbedder;
pub use error::{EmbeddingError, Result};
pub use pooling::{l2_normalize_in_place, pool, PoolingStrategy};
pub use sparse::{dense_to_sparse, merge_windows, sparsify, OutputLayout, SparseVector, SparsifyParams};
pub use splade::SparseEmbedder;
pub use windows::{split_into_windows, TokenWindow};
