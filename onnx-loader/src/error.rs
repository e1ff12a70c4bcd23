use crate::types::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OnnxError>;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("Library path not set, call set_library_path first")]
    LibraryPathNotSet,

    #[error("Cannot change {0} after environment is initialized")]
    AlreadyInitialized(&'static str),

    #[error("Failed to load ONNX Runtime library: {0}")]
    LibraryLoadFailed(String),

    #[error("Missing symbol {name}: {reason}")]
    SymbolNotFound { name: &'static str, reason: String },

    #[error("ONNX Runtime not initialized: call set_library_path and initialize first")]
    NotInitialized,

    #[error("{context}: {message} ({code:?})")]
    Native {
        context: String,
        code: ErrorCode,
        message: String,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Data length mismatch: shape {shape} needs {expected} elements, got {actual}")]
    DataLengthMismatch {
        shape: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} has been destroyed")]
    Destroyed(&'static str),

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<OnnxError>),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OnnxError {
    /// Collapse a list of failures into one error.
    ///
    /// Returns `None` for an empty list and the error itself for a single
    /// entry; nested `Multiple` errors are flattened.
    pub fn join(errors: Vec<OnnxError>) -> Option<OnnxError> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                OnnxError::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(OnnxError::Multiple(flat)),
        }
    }

    /// Native error code, if this error came from the runtime.
    pub fn native_code(&self) -> Option<ErrorCode> {
        match self {
            OnnxError::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn join_messages(errors: &[OnnxError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
