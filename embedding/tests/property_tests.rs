//! Property tests for pooling and sparsification

use ortbind_embedding::{
    dense_to_sparse, merge_windows, pool, split_into_windows, PoolingStrategy, SparseVector,
};
use ortbind_tokenization::TokenEncoding;
use proptest::prelude::*;

fn dense_row() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-4.0f32..4.0, 1..64)
}

proptest! {
    #[test]
    fn top_k_keeps_the_largest_values(row in dense_row(), top_k in 0usize..16) {
        let sparse = dense_to_sparse(&row, 0.0, top_k);
        sparse.validate().unwrap();

        let positive = row.iter().filter(|&&v| v > 0.0).count();
        let expected_len = if top_k == 0 { positive } else { positive.min(top_k) };
        prop_assert_eq!(sparse.len(), expected_len);

        // Nothing dropped may beat anything kept; ties resolve to the lower index.
        if let Some(min_kept) = sparse.values.iter().copied().reduce(f32::min) {
            for (index, &value) in row.iter().enumerate() {
                if value > 0.0 && sparse.get(index).is_none() {
                    prop_assert!(value <= min_kept);
                }
            }
        }
    }

    #[test]
    fn indices_strictly_increase(row in dense_row(), threshold in 0.0f32..2.0) {
        let sparse = dense_to_sparse(&row, threshold, 0);
        prop_assert!(sparse.indices.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(sparse.values.iter().all(|&v| v > threshold));
    }

    #[test]
    fn merge_is_per_dimension_max(a in dense_row(), b in dense_row()) {
        let windows: Vec<SparseVector> = [&a, &b].iter().map(|r| dense_to_sparse(r, 0.0, 0)).collect();
        let merged = merge_windows(&windows, 0.0, 0).unwrap();
        merged.validate().unwrap();
        for (&index, &value) in merged.indices.iter().zip(&merged.values) {
            let expected = a.get(index).copied().unwrap_or(0.0).max(b.get(index).copied().unwrap_or(0.0));
            prop_assert_eq!(value, expected);
        }
    }

    #[test]
    fn normalized_rows_have_unit_or_zero_norm(
        values in prop::collection::vec(-10.0f32..10.0, 12),
        mask in prop::collection::vec(0i64..2, 3),
    ) {
        let rows = pool(&values, &mask, 1, 3, 4, PoolingStrategy::Mean, true).unwrap();
        let norm: f32 = rows[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        prop_assert!(norm.is_finite());
        prop_assert!(norm < 1e-6 || (norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn windows_cover_every_token(
        ids in prop::collection::vec(1u32..1000, 0..200),
        sequence_length in 1usize..32,
        stride_seed in 1usize..32,
    ) {
        let stride = 1 + (stride_seed - 1) % sequence_length;
        let encoding = TokenEncoding {
            attention_mask: vec![1; ids.len()],
            type_ids: Vec::new(),
            ids: ids.clone(),
        };
        let windows = split_into_windows(&encoding, sequence_length, stride, false).unwrap();
        prop_assert!(!windows.is_empty());

        for (i, window) in windows.iter().enumerate() {
            prop_assert_eq!(window.input_ids.len(), sequence_length);
            let start = i * stride;
            for (offset, &id) in window.input_ids.iter().enumerate() {
                let expected = ids.get(start + offset).map_or(0, |&v| i64::from(v));
                prop_assert_eq!(id, expected);
            }
        }
        if let Some(last) = windows.len().checked_sub(1) {
            prop_assert!(ids.is_empty() || last * stride + sequence_length >= ids.len());
        }
    }
}
