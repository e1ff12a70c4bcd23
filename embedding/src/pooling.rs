//! Reducing `[batch, sequence, hidden]` model output to one vector per row

use crate::encoder::element_count;
use crate::error::{EmbeddingError, Result};
use ndarray::{ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Floor for the mean-pooling denominator.
pub const POOLING_DENOMINATOR_EPSILON: f32 = 1e-9;
/// Floor for the L2 norm.
pub const L2_NORM_EPSILON: f32 = 1e-12;

/// How token vectors are reduced to a document vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// Attention-mask weighted average of token vectors
    #[default]
    Mean,
    /// First token vector
    Cls,
    /// All token vectors, flattened
    None,
}

impl PoolingStrategy {
    /// Length of each output row.
    pub fn output_dimension(self, sequence_length: usize, hidden: usize) -> usize {
        match self {
            PoolingStrategy::Mean | PoolingStrategy::Cls => hidden,
            PoolingStrategy::None => sequence_length.saturating_mul(hidden),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoolingStrategy::Mean => "mean",
            PoolingStrategy::Cls => "cls",
            PoolingStrategy::None => "none",
        }
    }
}

impl fmt::Display for PoolingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolingStrategy {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(PoolingStrategy::Mean),
            "cls" => Ok(PoolingStrategy::Cls),
            "none" => Ok(PoolingStrategy::None),
            other => Err(EmbeddingError::Config(format!(
                "unsupported pooling strategy: {:?}",
                other
            ))),
        }
    }
}

/// Pool `hidden_states` (`[batch, sequence_length, hidden]`, row-major) into
/// one vector per row, optionally L2-normalized.
///
/// `attention_mask` is `[batch, sequence_length]`; only mean pooling reads it.
pub fn pool(
    hidden_states: &[f32],
    attention_mask: &[i64],
    batch: usize,
    sequence_length: usize,
    hidden: usize,
    strategy: PoolingStrategy,
    l2_normalize: bool,
) -> Result<Vec<Vec<f32>>> {
    let (states, mask) =
        validate_dense_output(hidden_states, attention_mask, batch, sequence_length, hidden)?;

    let mut rows = match strategy {
        PoolingStrategy::Mean => mean_pool(states, mask),
        PoolingStrategy::Cls => states
            .outer_iter()
            .map(|row| row.row(0).to_vec())
            .collect(),
        PoolingStrategy::None => states
            .outer_iter()
            .map(|row| row.iter().copied().collect())
            .collect(),
    };

    if l2_normalize {
        for row in &mut rows {
            l2_normalize_in_place(row);
        }
    }
    Ok(rows)
}

fn validate_dense_output<'a>(
    hidden_states: &'a [f32],
    attention_mask: &'a [i64],
    batch: usize,
    sequence_length: usize,
    hidden: usize,
) -> Result<(ArrayView3<'a, f32>, ArrayView2<'a, i64>)> {
    if batch == 0 {
        return Err(EmbeddingError::InvalidInput("batch size must be > 0".into()));
    }
    if sequence_length == 0 {
        return Err(EmbeddingError::InvalidInput("sequence length must be > 0".into()));
    }
    if hidden == 0 {
        return Err(EmbeddingError::InvalidInput("embedding dimension must be > 0".into()));
    }

    let expected_mask = element_count(&[batch, sequence_length])?;
    if attention_mask.len() != expected_mask {
        return Err(EmbeddingError::InvalidInput(format!(
            "attention mask length mismatch: got {}, want {}",
            attention_mask.len(),
            expected_mask
        )));
    }
    let expected_hidden = element_count(&[batch, sequence_length, hidden])?;
    if hidden_states.len() != expected_hidden {
        return Err(EmbeddingError::InvalidInput(format!(
            "hidden state length mismatch: got {}, want {}",
            hidden_states.len(),
            expected_hidden
        )));
    }

    let states = ArrayView3::from_shape((batch, sequence_length, hidden), hidden_states)
        .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?;
    let mask = ArrayView2::from_shape((batch, sequence_length), attention_mask)
        .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?;
    Ok((states, mask))
}

fn mean_pool(states: ArrayView3<'_, f32>, mask: ArrayView2<'_, i64>) -> Vec<Vec<f32>> {
    let hidden = states.len_of(Axis(2));
    states
        .outer_iter()
        .zip(mask.outer_iter())
        .map(|(tokens, row_mask)| {
            let mut sum = vec![0.0f32; hidden];
            let mut denominator = 0.0f32;
            for (token, &weight) in tokens.outer_iter().zip(row_mask.iter()) {
                if weight == 0 {
                    continue;
                }
                let weight = weight as f32;
                denominator += weight;
                for (acc, &value) in sum.iter_mut().zip(token.iter()) {
                    *acc += value * weight;
                }
            }
            let inv = 1.0 / denominator.max(POOLING_DENOMINATOR_EPSILON);
            sum.iter_mut().for_each(|v| *v *= inv);
            sum
        })
        .collect()
}

/// Scale `row` to unit Euclidean length; an all-zero row stays zero.
pub fn l2_normalize_in_place(row: &mut [f32]) {
    let norm_squared: f64 = row.iter().map(|&v| f64::from(v * v)).sum();
    let norm = (norm_squared.sqrt() as f32).max(L2_NORM_EPSILON);
    let inv = 1.0 / norm;
    row.iter_mut().for_each(|v| *v *= inv);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_mean_pooling_masks_padding_then_normalizes() {
        let rows = pool(&[1.0, 2.0, 3.0, 4.0], &[1, 0], 1, 2, 2, PoolingStrategy::Mean, true)
            .unwrap();
        assert_close(&rows[0], &[0.4472, 0.8944]);
    }

    #[test]
    fn test_mean_pooling_averages_unmasked() {
        let rows = pool(
            &[1.0, 2.0, 3.0, 4.0, 100.0, 100.0],
            &[1, 1, 0],
            1,
            3,
            2,
            PoolingStrategy::Mean,
            false,
        )
        .unwrap();
        assert_close(&rows[0], &[2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_all_masked_is_zero() {
        let rows = pool(&[5.0, 6.0, 7.0, 8.0], &[0, 0], 1, 2, 2, PoolingStrategy::Mean, true)
            .unwrap();
        assert_eq!(rows[0], vec![0.0, 0.0]);
        assert!(rows[0].iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_cls_pooling_takes_first_token() {
        let states: Vec<f32> = (1..=12).map(|v| v as f32).collect();
        let rows = pool(&states, &[0; 6], 2, 3, 2, PoolingStrategy::Cls, false).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0], vec![7.0, 8.0]]);
    }

    #[test]
    fn test_no_pooling_flattens_rows() {
        let states: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let rows = pool(&states, &[1; 4], 2, 2, 2, PoolingStrategy::None, false).unwrap();
        assert_eq!(rows[0], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rows[1], vec![5.0, 6.0, 7.0, 8.0]);
        assert_eq!(PoolingStrategy::None.output_dimension(2, 2), 4);
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let result = pool(&[1.0; 7], &[1, 1], 1, 2, 4, PoolingStrategy::Mean, false);
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
        let result = pool(&[1.0; 8], &[1], 1, 2, 4, PoolingStrategy::Mean, false);
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
    }

    #[test]
    fn test_overflowing_shape_is_reported() {
        let result = pool(&[1.0; 4], &[1, 1], 2, usize::MAX / 2 + 1, 2, PoolingStrategy::Cls, false);
        match result {
            Err(EmbeddingError::InvalidInput(message)) => assert!(message.contains("overflows")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
        let result = pool(&[1.0; 4], &[1, 1], 1, 2, usize::MAX, PoolingStrategy::Mean, false);
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(m)) if m.contains("overflows")));
    }

    #[test]
    fn test_l2_zero_row_stays_zero() {
        let mut row = vec![0.0f32; 4];
        l2_normalize_in_place(&mut row);
        assert_eq!(row, vec![0.0; 4]);
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("CLS".parse::<PoolingStrategy>().unwrap(), PoolingStrategy::Cls);
        assert_eq!(PoolingStrategy::Mean.to_string(), "mean");
        assert!("max".parse::<PoolingStrategy>().is_err());
    }
}
