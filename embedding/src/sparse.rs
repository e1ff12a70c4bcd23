//! Turning vocabulary logits into pruned sparse vectors

use crate::encoder::element_count;
use crate::error::{EmbeddingError, Result};
use ndarray::{ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Sparse embedding of one document
///
/// `indices` are strictly increasing vocabulary ids; `values` and (when
/// present) `labels` run parallel to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<usize>,
    pub values: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl SparseVector {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Check the parallel-length and ordering invariants.
    pub fn validate(&self) -> Result<()> {
        if self.indices.len() != self.values.len() {
            return Err(EmbeddingError::InvalidInput(format!(
                "sparse vector has mismatched indices/values lengths: indices={} values={}",
                self.indices.len(),
                self.values.len()
            )));
        }
        if let Some(labels) = &self.labels {
            if labels.len() != self.indices.len() {
                return Err(EmbeddingError::InvalidInput(format!(
                    "sparse vector has mismatched labels/indices lengths: labels={} indices={}",
                    labels.len(),
                    self.indices.len()
                )));
            }
        }
        if let Some(pos) = self.indices.windows(2).position(|w| w[0] >= w[1]) {
            return Err(EmbeddingError::InvalidInput(format!(
                "sparse vector indices are not strictly increasing at position {}",
                pos + 1
            )));
        }
        Ok(())
    }

    /// Value stored for `index`, if kept.
    pub fn get(&self, index: usize) -> Option<f32> {
        self.indices
            .binary_search(&index)
            .ok()
            .map(|pos| self.values[pos])
    }
}

/// Shape of the sparse model's output tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `[batch, sequence_length, vocab]`
    #[default]
    TokenLogits,
    /// `[batch, vocab]`
    DocumentLogits,
}

impl OutputLayout {
    /// Output tensor dimensions for a batch.
    pub fn output_shape(self, batch: usize, sequence_length: usize, vocab: usize) -> Vec<i64> {
        match self {
            OutputLayout::TokenLogits => vec![batch as i64, sequence_length as i64, vocab as i64],
            OutputLayout::DocumentLogits => vec![batch as i64, vocab as i64],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputLayout::TokenLogits => "token_logits",
            OutputLayout::DocumentLogits => "document_logits",
        }
    }
}

impl fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputLayout {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token_logits" => Ok(OutputLayout::TokenLogits),
            "document_logits" => Ok(OutputLayout::DocumentLogits),
            other => Err(EmbeddingError::Config(format!(
                "unsupported output layout: {:?}",
                other
            ))),
        }
    }
}

/// Post-processing parameters for [`sparsify`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparsifyParams {
    pub layout: OutputLayout,
    pub prune_threshold: f32,
    pub top_k: usize,
    pub log1p_relu: bool,
}

/// Reduce model output for `batch` rows to one sparse vector per row.
///
/// Token logits take, per vocabulary id, the max over unmasked positions of
/// the (optionally `ln(1 + relu(x))`) activation; document logits are
/// transformed in place. Both are then pruned with [`dense_to_sparse`].
pub fn sparsify(
    output: &[f32],
    attention_mask: &[i64],
    batch: usize,
    sequence_length: usize,
    vocab: usize,
    params: &SparsifyParams,
) -> Result<Vec<SparseVector>> {
    if batch == 0 {
        return Err(EmbeddingError::InvalidInput("batch size must be > 0".into()));
    }
    if sequence_length == 0 {
        return Err(EmbeddingError::InvalidInput("sequence length must be > 0".into()));
    }
    if vocab == 0 {
        return Err(EmbeddingError::InvalidInput("vocabulary size must be > 0".into()));
    }
    check_prune_threshold(params.prune_threshold)?;

    let mask_len = element_count(&[batch, sequence_length])?;
    if attention_mask.len() != mask_len {
        return Err(EmbeddingError::InvalidInput(format!(
            "attention mask length mismatch: got {}, want {}",
            attention_mask.len(),
            mask_len
        )));
    }
    let mask = ArrayView2::from_shape((batch, sequence_length), attention_mask)
        .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?;

    match params.layout {
        OutputLayout::TokenLogits => {
            let expected = element_count(&[batch, sequence_length, vocab])?;
            if output.len() != expected {
                return Err(EmbeddingError::InvalidInput(format!(
                    "token logits length mismatch: got {}, want {}",
                    output.len(),
                    expected
                )));
            }
            let logits = ArrayView3::from_shape((batch, sequence_length, vocab), output)
                .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?;

            let rows = logits
                .outer_iter()
                .zip(mask.outer_iter())
                .map(|(tokens, row_mask)| {
                    let mut dense = vec![0.0f32; vocab];
                    for (token, &m) in tokens.outer_iter().zip(row_mask.iter()) {
                        if m == 0 {
                            continue;
                        }
                        for (slot, &raw) in dense.iter_mut().zip(token.iter()) {
                            let value = if params.log1p_relu {
                                if raw <= 0.0 {
                                    continue;
                                }
                                raw.ln_1p()
                            } else {
                                raw
                            };
                            if value > *slot {
                                *slot = value;
                            }
                        }
                    }
                    dense_to_sparse(&dense, params.prune_threshold, params.top_k)
                })
                .collect();
            Ok(rows)
        }
        OutputLayout::DocumentLogits => {
            let expected = element_count(&[batch, vocab])?;
            if output.len() != expected {
                return Err(EmbeddingError::InvalidInput(format!(
                    "document logits length mismatch: got {}, want {}",
                    output.len(),
                    expected
                )));
            }
            let rows = output
                .chunks_exact(vocab)
                .map(|row| {
                    let mut dense = row.to_vec();
                    if params.log1p_relu {
                        dense
                            .iter_mut()
                            .for_each(|v| *v = if *v <= 0.0 { 0.0 } else { v.ln_1p() });
                    }
                    dense_to_sparse(&dense, params.prune_threshold, params.top_k)
                })
                .collect();
            Ok(rows)
        }
    }
}

/// Keep entries above `prune_threshold`, then the `top_k` largest (ties go
/// to the lower index; 0 keeps all), sorted by index.
pub fn dense_to_sparse(dense: &[f32], prune_threshold: f32, top_k: usize) -> SparseVector {
    let candidates = dense
        .iter()
        .enumerate()
        .filter(|(_, &value)| value > prune_threshold)
        .map(|(index, &value)| (index, value))
        .collect();
    select(candidates, top_k)
}

/// Merge per-window vectors by per-index max, then prune and cut to `top_k`
/// exactly like [`dense_to_sparse`].
pub fn merge_windows(
    windows: &[SparseVector],
    prune_threshold: f32,
    top_k: usize,
) -> Result<SparseVector> {
    check_prune_threshold(prune_threshold)?;
    let mut max_per_index: HashMap<usize, f32> = HashMap::new();
    for (i, window) in windows.iter().enumerate() {
        window
            .validate()
            .map_err(|e| e.context(format!("invalid sparse window {}", i)))?;
        for (&index, &value) in window.indices.iter().zip(&window.values) {
            max_per_index
                .entry(index)
                .and_modify(|current| {
                    if value > *current {
                        *current = value;
                    }
                })
                .or_insert(value);
        }
    }

    let candidates = max_per_index
        .into_iter()
        .filter(|&(_, value)| value > prune_threshold)
        .collect();
    Ok(select(candidates, top_k))
}

fn select(mut candidates: Vec<(usize, f32)>, top_k: usize) -> SparseVector {
    if top_k > 0 && candidates.len() > top_k {
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(top_k);
    }
    candidates.sort_unstable_by_key(|&(index, _)| index);

    let (indices, values) = candidates.into_iter().unzip();
    SparseVector {
        indices,
        values,
        labels: None,
    }
}

fn check_prune_threshold(threshold: f32) -> Result<()> {
    if !(threshold >= 0.0) {
        return Err(EmbeddingError::InvalidInput(format!(
            "prune threshold must be >= 0, got {}",
            threshold
        )));
    }
    Ok(())
}
