//! A session bound to its own token and output tensors for one batch size

use crate::cache::CachedResource;
use crate::error::{EmbeddingError, Result};
use crate::windows::{fill_from_encodings, fill_from_windows, TokenWindow};
use ortbind_onnx_loader::{
    Environment, InferenceSession, OnnxError, Runtime, SessionOptions, Shape, Tensor,
    TensorElement, Value,
};
use ortbind_tokenization::{TextTokenizer, TokenEncoding};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything needed to create a session for any batch size
#[derive(Debug, Clone)]
pub(crate) struct ModelBinding {
    pub model_path: PathBuf,
    /// input_ids, attention_mask and optionally token_type_ids, in that order
    pub input_names: Vec<String>,
    pub output_name: String,
    pub sequence_length: usize,
    pub options: SessionOptions,
}

impl ModelBinding {
    pub fn uses_token_type_ids(&self) -> bool {
        self.input_names.len() > 2
    }
}

/// Input tensors, output tensor and the session reading/writing them.
pub(crate) struct SessionBundle {
    batch_size: usize,
    sequence_length: usize,
    input_ids: Tensor<i64>,
    attention_mask: Tensor<i64>,
    token_type_ids: Option<Tensor<i64>>,
    output: Tensor<f32>,
    session: InferenceSession,
}

impl SessionBundle {
    /// Allocate `[batch_size, sequence_length]` token tensors and an output
    /// tensor of `output_dims`, then load the model bound to them.
    ///
    /// Tensors already created are destroyed if a later step fails.
    pub fn create(
        runtime: &Arc<Runtime>,
        binding: &ModelBinding,
        batch_size: usize,
        output_dims: Vec<i64>,
    ) -> Result<Self> {
        let token_shape = Shape::new([dim(batch_size)?, dim(binding.sequence_length)?]);

        let mut input_ids = Tensor::<i64>::new_empty(runtime, token_shape.clone())
            .map_err(|e| EmbeddingError::from(e).context("failed to create input_ids tensor"))?;

        let mut attention_mask = match Tensor::<i64>::new_empty(runtime, token_shape.clone()) {
            Ok(t) => t,
            Err(e) => {
                let error = EmbeddingError::from(e).context("failed to create attention_mask tensor");
                return Err(with_cleanup(error, &mut [&mut input_ids]));
            }
        };

        let mut token_type_ids = None;
        if binding.uses_token_type_ids() {
            match Tensor::<i64>::new_empty(runtime, token_shape) {
                Ok(t) => token_type_ids = Some(t),
                Err(e) => {
                    let error =
                        EmbeddingError::from(e).context("failed to create token_type_ids tensor");
                    return Err(with_cleanup(error, &mut [&mut attention_mask, &mut input_ids]));
                }
            }
        }

        let mut output = match Tensor::<f32>::new_empty(runtime, output_dims) {
            Ok(t) => t,
            Err(e) => {
                let error = EmbeddingError::from(e).context("failed to create output tensor");
                return Err(cleanup_inputs(
                    error,
                    &mut input_ids,
                    &mut attention_mask,
                    token_type_ids.as_mut(),
                ));
            }
        };

        let created = {
            let mut inputs: Vec<&dyn Value> = vec![&input_ids, &attention_mask];
            if let Some(types) = token_type_ids.as_ref() {
                inputs.push(types);
            }
            let outputs: [&dyn Value; 1] = [&output];
            InferenceSession::create(
                runtime,
                &binding.model_path,
                &binding.input_names,
                std::slice::from_ref(&binding.output_name),
                &inputs,
                &outputs,
                Some(&binding.options),
            )
        };
        let session = match created {
            Ok(s) => s,
            Err(e) => {
                let error = EmbeddingError::from(e).context("failed to create inference session");
                let error = with_cleanup(error, &mut [&mut output]);
                return Err(cleanup_inputs(
                    error,
                    &mut input_ids,
                    &mut attention_mask,
                    token_type_ids.as_mut(),
                ));
            }
        };

        log::debug!(
            "Created batch-{} session for {}",
            batch_size,
            binding.model_path.display()
        );

        Ok(Self {
            batch_size,
            sequence_length: binding.sequence_length,
            input_ids,
            attention_mask,
            token_type_ids,
            output,
            session,
        })
    }

    /// Write one row per encoding into the token tensors.
    pub fn fill_encodings(&mut self, encodings: &[TokenEncoding]) -> Result<()> {
        self.check_rows(encodings.len())?;
        fill_from_encodings(
            encodings,
            self.sequence_length,
            self.input_ids.data_mut(),
            self.attention_mask.data_mut(),
            self.token_type_ids.as_mut().map(|t| t.data_mut()),
        )
    }

    /// Write one row per window into the token tensors.
    pub fn fill_windows(&mut self, windows: &[TokenWindow]) -> Result<()> {
        self.check_rows(windows.len())?;
        fill_from_windows(
            windows,
            self.sequence_length,
            self.input_ids.data_mut(),
            self.attention_mask.data_mut(),
            self.token_type_ids.as_mut().map(|t| t.data_mut()),
        )
    }

    pub fn run(&mut self) -> Result<()> {
        let mut inputs: Vec<&dyn Value> = vec![&self.input_ids, &self.attention_mask];
        if let Some(types) = self.token_type_ids.as_ref() {
            inputs.push(types);
        }
        let mut outputs: [&mut dyn Value; 1] = [&mut self.output];
        self.session.run(&inputs, &mut outputs)?;
        Ok(())
    }

    pub fn output(&self) -> &[f32] {
        self.output.data()
    }

    pub fn attention_mask(&self) -> &[i64] {
        self.attention_mask.data()
    }

    fn check_rows(&self, rows: usize) -> Result<()> {
        if rows != self.batch_size {
            return Err(EmbeddingError::InvalidInput(format!(
                "batch-{} session cannot hold {} rows",
                self.batch_size, rows
            )));
        }
        Ok(())
    }
}

impl CachedResource for SessionBundle {
    /// Release the session, then the output and input tensors.
    fn destroy(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.session.destroy() {
            errors.push(EmbeddingError::from(e).context("failed to destroy session"));
        }
        let mut tensors: Vec<(&str, &mut dyn CachedResource)> = Vec::with_capacity(4);
        tensors.push(("output", &mut self.output));
        if let Some(types) = self.token_type_ids.as_mut() {
            tensors.push(("token_type_ids", types));
        }
        tensors.push(("attention_mask", &mut self.attention_mask));
        tensors.push(("input_ids", &mut self.input_ids));
        for (name, tensor) in tensors {
            if let Err(e) = tensor.destroy() {
                errors.push(e.context(format!("failed to destroy {} tensor", name)));
            }
        }
        match EmbeddingError::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<T: TensorElement> CachedResource for Tensor<T> {
    fn destroy(&mut self) -> Result<()> {
        Value::destroy(self)?;
        Ok(())
    }
}

impl std::fmt::Debug for SessionBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBundle")
            .field("batch_size", &self.batch_size)
            .field("sequence_length", &self.sequence_length)
            .field("session", &self.session)
            .finish()
    }
}

/// The loaded runtime, or `RuntimeNotInitialized` if the environment is down.
pub(crate) fn runtime_of(environment: &Environment) -> Result<Arc<Runtime>> {
    environment.runtime().map_err(|e| match e {
        OnnxError::NotInitialized => EmbeddingError::RuntimeNotInitialized,
        other => other.into(),
    })
}

/// Encode every document, naming the first one that fails.
pub(crate) fn encode_all<S: AsRef<str>>(
    tokenizer: &dyn TextTokenizer,
    documents: &[S],
) -> Result<Vec<TokenEncoding>> {
    documents
        .iter()
        .enumerate()
        .map(|(i, document)| {
            tokenizer.encode(document.as_ref()).map_err(|e| {
                EmbeddingError::from(e).context(format!("failed to tokenize document {}", i))
            })
        })
        .collect()
}

/// Check that a model or tokenizer path is set and points at a file.
pub(crate) fn check_file(path: &Path, what: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(EmbeddingError::InvalidInput(format!("{} path cannot be empty", what)));
    }
    if !path.is_file() {
        return Err(EmbeddingError::FileNotFound(format!(
            "{} path {} is not usable",
            what,
            path.display()
        )));
    }
    Ok(())
}

/// Product of `sizes`, or `InvalidInput` if it overflows `usize`.
pub(crate) fn element_count(sizes: &[usize]) -> Result<usize> {
    sizes
        .iter()
        .try_fold(1usize, |acc, &size| acc.checked_mul(size))
        .ok_or_else(|| {
            EmbeddingError::InvalidInput(format!("buffer of shape {:?} overflows usize", sizes))
        })
}

pub(crate) fn dims(sizes: &[usize]) -> Result<Vec<i64>> {
    sizes.iter().map(|&size| dim(size)).collect()
}

fn dim(size: usize) -> Result<i64> {
    i64::try_from(size)
        .map_err(|_| EmbeddingError::InvalidInput(format!("dimension {} overflows i64", size)))
}

fn cleanup_inputs(
    error: EmbeddingError,
    input_ids: &mut Tensor<i64>,
    attention_mask: &mut Tensor<i64>,
    token_type_ids: Option<&mut Tensor<i64>>,
) -> EmbeddingError {
    match token_type_ids {
        Some(types) => with_cleanup(error, &mut [types, attention_mask, input_ids]),
        None => with_cleanup(error, &mut [attention_mask, input_ids]),
    }
}

/// Destroy `created` in order, joining any failures with `error`.
fn with_cleanup(
    error: EmbeddingError,
    created: &mut [&mut dyn CachedResource],
) -> EmbeddingError {
    let failures: Vec<EmbeddingError> = created
        .iter_mut()
        .filter_map(|resource| resource.destroy().err())
        .collect();
    match EmbeddingError::join(failures) {
        Some(cleanup) => EmbeddingError::Multiple(vec![
            error,
            cleanup.context("failed to clean up session tensors"),
        ]),
        None => error,
    }
}
