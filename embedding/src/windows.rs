//! Token buffers: filling fixed-length rows and splitting long encodings
//! into overlapping windows

use crate::encoder::element_count;
use crate::error::{EmbeddingError, Result};
use ortbind_tokenization::TokenEncoding;

/// One fixed-length slice of a document's tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenWindow {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    /// Present only when the model consumes token type ids.
    pub token_type_ids: Option<Vec<i64>>,
}

/// Split `encoding` into windows of `sequence_length` tokens starting every
/// `stride` tokens, stopping at the first window that reaches the end.
///
/// Short windows are zero-padded. An empty encoding yields one all-padding
/// window.
pub fn split_into_windows(
    encoding: &TokenEncoding,
    sequence_length: usize,
    stride: usize,
    use_token_type_ids: bool,
) -> Result<Vec<TokenWindow>> {
    if sequence_length == 0 {
        return Err(EmbeddingError::InvalidInput("sequence length must be > 0".into()));
    }
    if stride == 0 || stride > sequence_length {
        return Err(EmbeddingError::InvalidInput(format!(
            "sliding window stride must be in 1..={}, got {}",
            sequence_length, stride
        )));
    }

    check_encoding(encoding)?;
    let token_count = encoding.ids.len();
    let empty_window = || TokenWindow {
        input_ids: vec![0; sequence_length],
        attention_mask: vec![0; sequence_length],
        token_type_ids: use_token_type_ids.then(|| vec![0; sequence_length]),
    };
    if token_count == 0 {
        return Ok(vec![empty_window()]);
    }

    let ids = widen(&encoding.ids);
    let attention = if encoding.attention_mask.is_empty() {
        derived_mask(&ids)
    } else {
        widen(&encoding.attention_mask)
    };
    let type_ids = widen(&encoding.type_ids);

    let mut windows = Vec::with_capacity(1 + token_count / stride);
    let mut start = 0;
    while start < token_count {
        let end = (start + sequence_length).min(token_count);
        let mut window = empty_window();
        copy_prefix(&mut window.input_ids, &ids[start..end]);
        copy_prefix(&mut window.attention_mask, &attention[start..end]);
        if let Some(types) = window.token_type_ids.as_mut() {
            if !type_ids.is_empty() {
                copy_prefix(types, &type_ids[start..end]);
            }
        }
        windows.push(window);
        if end == token_count {
            break;
        }
        start += stride;
    }
    Ok(windows)
}

/// Copy windows into row-major `[windows, sequence_length]` buffers.
///
/// `token_type_ids` must be `Some` exactly when the windows carry type ids.
pub fn fill_from_windows(
    windows: &[TokenWindow],
    sequence_length: usize,
    input_ids: &mut [i64],
    attention_mask: &mut [i64],
    mut token_type_ids: Option<&mut [i64]>,
) -> Result<()> {
    if windows.is_empty() {
        return Err(EmbeddingError::InvalidInput("window batch cannot be empty".into()));
    }
    let total = element_count(&[windows.len(), sequence_length])?;
    check_buffers(total, input_ids, attention_mask, token_type_ids.as_deref())?;

    input_ids.fill(0);
    attention_mask.fill(0);
    if let Some(types) = token_type_ids.as_deref_mut() {
        types.fill(0);
    }

    for (i, window) in windows.iter().enumerate() {
        if window.input_ids.len() != sequence_length
            || window.attention_mask.len() != sequence_length
        {
            return Err(EmbeddingError::InvalidInput(format!(
                "window {} has invalid sequence length: input_ids={} attention_mask={} want {}",
                i,
                window.input_ids.len(),
                window.attention_mask.len(),
                sequence_length
            )));
        }
        let row = i * sequence_length..(i + 1) * sequence_length;
        input_ids[row.clone()].copy_from_slice(&window.input_ids);
        attention_mask[row.clone()].copy_from_slice(&window.attention_mask);

        match (token_type_ids.as_deref_mut(), &window.token_type_ids) {
            (Some(types), Some(window_types)) if window_types.len() == sequence_length => {
                types[row].copy_from_slice(window_types);
            }
            (Some(_), Some(window_types)) => {
                return Err(EmbeddingError::InvalidInput(format!(
                    "window {} has invalid token_type_ids length: got {} want {}",
                    i,
                    window_types.len(),
                    sequence_length
                )));
            }
            (Some(_), None) => {
                return Err(EmbeddingError::InvalidInput(format!(
                    "window {} is missing token_type_ids",
                    i
                )));
            }
            (None, Some(_)) => {
                return Err(EmbeddingError::InvalidInput(format!(
                    "window {} includes token_type_ids but the session does not expect them",
                    i
                )));
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// Write one fixed-length row per encoding into row-major buffers.
///
/// Each row copies at most `sequence_length` tokens; the rest stays zero.
/// A missing attention mask is derived from non-zero ids, and type ids are
/// copied only when both the buffer and the encoding have them.
pub fn fill_from_encodings(
    encodings: &[TokenEncoding],
    sequence_length: usize,
    input_ids: &mut [i64],
    attention_mask: &mut [i64],
    mut token_type_ids: Option<&mut [i64]>,
) -> Result<()> {
    let total = element_count(&[encodings.len(), sequence_length])?;
    check_buffers(total, input_ids, attention_mask, token_type_ids.as_deref())?;
    for (i, encoding) in encodings.iter().enumerate() {
        check_encoding(encoding).map_err(|e| e.context(format!("encoding {}", i)))?;
    }

    input_ids.fill(0);
    attention_mask.fill(0);
    if let Some(types) = token_type_ids.as_deref_mut() {
        types.fill(0);
    }

    for (i, encoding) in encodings.iter().enumerate() {
        let row = i * sequence_length..(i + 1) * sequence_length;
        copy_prefix(&mut input_ids[row.clone()], &widen(&encoding.ids));
        if encoding.attention_mask.is_empty() {
            let ids = &input_ids[row.clone()];
            let derived = derived_mask(ids);
            attention_mask[row.clone()].copy_from_slice(&derived);
        } else {
            copy_prefix(&mut attention_mask[row.clone()], &widen(&encoding.attention_mask));
        }
        if let Some(types) = token_type_ids.as_deref_mut() {
            if !encoding.type_ids.is_empty() {
                copy_prefix(&mut types[row], &widen(&encoding.type_ids));
            }
        }
    }
    Ok(())
}

/// Attention mask and type ids must be empty or as long as the ids.
fn check_encoding(encoding: &TokenEncoding) -> Result<()> {
    let tokens = encoding.ids.len();
    for (name, len) in [
        ("attention_mask", encoding.attention_mask.len()),
        ("type_ids", encoding.type_ids.len()),
    ] {
        if len != 0 && len != tokens {
            return Err(EmbeddingError::InvalidInput(format!(
                "{} has {} entries for {} token ids",
                name, len, tokens
            )));
        }
    }
    Ok(())
}

fn check_buffers(
    total: usize,
    input_ids: &[i64],
    attention_mask: &[i64],
    token_type_ids: Option<&[i64]>,
) -> Result<()> {
    if input_ids.len() != total || attention_mask.len() != total {
        return Err(EmbeddingError::InvalidInput(format!(
            "token buffer length mismatch: got input_ids={} attention_mask={}, want {}",
            input_ids.len(),
            attention_mask.len(),
            total
        )));
    }
    if let Some(types) = token_type_ids {
        if types.len() != total {
            return Err(EmbeddingError::InvalidInput(format!(
                "token_type_ids buffer length mismatch: got {}, want {}",
                types.len(),
                total
            )));
        }
    }
    Ok(())
}

fn widen(src: &[u32]) -> Vec<i64> {
    src.iter().map(|&v| i64::from(v)).collect()
}

fn derived_mask(ids: &[i64]) -> Vec<i64> {
    ids.iter().map(|&id| i64::from(id != 0)).collect()
}

fn copy_prefix(dst: &mut [i64], src: &[i64]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}
