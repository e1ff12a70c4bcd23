use ortbind_onnx_loader::OnnxError;
use ortbind_tokenization::TokenizationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Embedder has been closed")]
    Closed,

    #[error("ONNX Runtime not initialized: call set_library_path and initialize first")]
    RuntimeNotInitialized,

    #[error("pre-processor panic on document {index}: {message}")]
    PreProcessorPanic { index: usize, message: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<EmbeddingError>,
    },

    #[error(transparent)]
    Onnx(#[from] OnnxError),

    #[error(transparent)]
    Tokenization(#[from] TokenizationError),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<EmbeddingError>),
}

impl EmbeddingError {
    /// Prefix this error with `context`.
    pub fn context(self, context: impl Into<String>) -> Self {
        EmbeddingError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Collapse a list of failures into one error, flattening nested lists.
    pub fn join(errors: Vec<EmbeddingError>) -> Option<EmbeddingError> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                EmbeddingError::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(EmbeddingError::Multiple(flat)),
        }
    }
}

fn join_messages(errors: &[EmbeddingError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
