//! Tokenizer tests against a small WordPiece `tokenizer.json` fixture

use ortbind_tokenization::{TextTokenizer, TokenizationError, Tokenizer};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const FIXTURE: &str = r###"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "[PAD]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 1, "content": "[UNK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 2, "content": "[CLS]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 3, "content": "[SEP]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": {"type": "Lowercase"},
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": {
    "type": "TemplateProcessing",
    "single": [
      {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 0}}
    ],
    "pair": [
      {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 0}},
      {"Sequence": {"id": "B", "type_id": 1}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 1}}
    ],
    "special_tokens": {
      "[CLS]": {"id": "[CLS]", "ids": [2], "tokens": ["[CLS]"]},
      "[SEP]": {"id": "[SEP]", "ids": [3], "tokens": ["[SEP]"]}
    }
  },
  "decoder": {"type": "WordPiece", "prefix": "##", "cleanup": true},
  "model": {
    "type": "WordPiece",
    "unk_token": "[UNK]",
    "continuing_subword_prefix": "##",
    "max_input_chars_per_word": 100,
    "vocab": {
      "[PAD]": 0,
      "[UNK]": 1,
      "[CLS]": 2,
      "[SEP]": 3,
      "sparse": 4,
      "dense": 5,
      "vector": 6,
      "embed": 7,
      "##ding": 8,
      "query": 9
    }
  }
}"###;

fn fixture() -> (TempDir, PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("tokenizer.json");
    fs::write(&path, FIXTURE).expect("Failed to write tokenizer.json");
    (dir, path)
}

#[test]
fn test_from_nonexistent_file() {
    let result = Tokenizer::from_file("does/not/exist/tokenizer.json");
    assert!(matches!(result, Err(TokenizationError::LoadFailed(_))));
}

#[test]
fn test_encode_adds_special_tokens() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap();

    let encoding = tokenizer.encode("sparse vector").unwrap();
    assert_eq!(encoding.ids, vec![2, 4, 6, 3]);
    assert_eq!(encoding.attention_mask, vec![1, 1, 1, 1]);
    assert_eq!(encoding.type_ids, vec![0, 0, 0, 0]);
}

#[test]
fn test_unfixed_length_follows_input() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap();
    assert_eq!(tokenizer.fixed_length(), None);

    let short = tokenizer.encode("query").unwrap();
    let long = tokenizer.encode("dense sparse vector query embedding").unwrap();
    assert_eq!(short.len(), 3);
    assert!(long.len() > short.len());
}

#[test]
fn test_fixed_length_pads() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap().with_fixed_length(8).unwrap();

    let encoding = tokenizer.encode("dense vector").unwrap();
    assert_eq!(encoding.ids, vec![2, 5, 6, 3, 0, 0, 0, 0]);
    assert_eq!(encoding.attention_mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
    assert_eq!(encoding.type_ids.len(), 8);
}

#[test]
fn test_fixed_length_truncates() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap().with_fixed_length(4).unwrap();

    let encoding = tokenizer.encode("dense sparse vector query").unwrap();
    assert_eq!(encoding.len(), 4);
    assert_eq!(encoding.ids[0], 2);
    assert_eq!(encoding.ids[3], 3);
}

#[test]
fn test_zero_fixed_length_rejected() {
    let (_dir, path) = fixture();
    let result = Tokenizer::from_file(&path).unwrap().with_fixed_length(0);
    assert!(matches!(result, Err(TokenizationError::InvalidInput(_))));
}

#[test]
fn test_decode_single_id_keeps_special_tokens() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap();

    assert_eq!(tokenizer.decode(&[6], false).unwrap(), "vector");
    assert_eq!(tokenizer.decode(&[2], false).unwrap(), "[CLS]");
    assert_eq!(tokenizer.decode(&[2, 7, 8, 3], true).unwrap(), "embedding");
}

#[test]
fn test_vocab_size() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap();
    // Ten model entries; the special tokens are already part of the vocab.
    assert!(matches!(tokenizer.vocab_size(), Some(n) if n >= 10));
}

#[test]
fn test_unknown_words_map_to_unk() {
    let (_dir, path) = fixture();
    let tokenizer = Tokenizer::from_file(&path).unwrap();

    let encoding = tokenizer.encode("xyz").unwrap();
    assert_eq!(encoding.ids, vec![2, 1, 3]);
}

#[test]
fn test_trait_object_is_usable() {
    let (_dir, path) = fixture();
    let tokenizer: Box<dyn TextTokenizer> = Box::new(Tokenizer::from_file(&path).unwrap());
    let encoding = tokenizer.encode("").unwrap();
    assert_eq!(encoding.ids, vec![2, 3]);
}
