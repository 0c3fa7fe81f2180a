// ============================================================
// Layer 6 - Tokenizer Store
// ============================================================
// Loads the model's tokenizer.json, or builds a word-level
// tokenizer from the training corpus when the model directory
// does not ship one.
//
// Every tokenizer handed out is truncated to max_len and has
// padding switched off. Padding happens per batch in the
// batcher, to the longest sequence of that batch.
//
// In tokenizers 0.15, train_from_files requires Trainer::Model
// to equal ModelWrapper. The fallback therefore writes the
// tokenizer JSON by hand and loads it back.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokenizers::{Tokenizer, TruncationParams};

/// Padding token names, tried in order.
const PAD_TOKENS: [&str; 3] = ["[PAD]", "<pad>", "<PAD>"];

/// Special tokens sit at BERT ids 0, 1 and 101..=103
const FIRST_WORD_ID: usize = 104;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load the existing tokenizer or build a new one from texts
    pub fn load_or_build(
        &self,
        texts:      &[String],
        vocab_size: usize,
        max_len:    usize,
    ) -> Result<Tokenizer> {
        if self.path().exists() {
            tracing::info!("Loading tokenizer from '{}'", self.path().display());
            self.load(max_len)
        } else {
            tracing::warn!(
                "No tokenizer.json in '{}', building a word-level tokenizer (vocab_size={})",
                self.dir.display(),
                vocab_size,
            );
            self.build_and_save(texts, vocab_size)?;
            self.load(max_len)
        }
    }

    /// Load tokenizer.json, truncating to `max_len` with padding off
    pub fn load(&self, max_len: usize) -> Result<Tokenizer> {
        let path = self.path();
        let mut tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_len,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Cannot set truncation to {max_len}: {e}"))?;
        tokenizer.with_padding(None);

        Ok(tokenizer)
    }

    /// Build a word-level vocabulary from the corpus and write
    /// a tokenizer JSON in HuggingFace format.
    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: Word frequencies ──────────────────────────────────────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in text.split_whitespace() {
                let w = word.to_lowercase();
                let w = w.trim_matches(|c: char| !c.is_alphanumeric());
                if !w.is_empty() {
                    *freq.entry(w.to_string()).or_insert(0) += 1;
                }
            }
        }

        // Most frequent first, ties broken alphabetically so the
        // vocabulary is the same on every run. Word ids start at
        // FIRST_WORD_ID and must stay below vocab_size.
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size.saturating_sub(FIRST_WORD_ID));

        // ── Step 2: Vocab, special tokens at BERT ids ─────────────────────────
        let mut vocab = serde_json::json!({
            "[PAD]":  0,
            "[UNK]":  1,
            "[CLS]":  101,
            "[SEP]":  102,
            "[MASK]": 103,
        });

        let mut next_id = FIRST_WORD_ID;
        for (word, _) in &words {
            if vocab.get(word).is_none() {
                vocab[word] = serde_json::json!(next_id);
                next_id += 1;
            }
        }

        // ── Step 3: Tokenizer JSON ────────────────────────────────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": {
                "type": "Whitespace"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let tok_path = self.path();
        std::fs::write(&tok_path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write '{}'", tok_path.display()))?;

        tracing::info!(
            "Tokenizer built with {} words, saved to '{}'",
            words.len(),
            tok_path.display()
        );
        Ok(())
    }
}

/// One past the largest token id, i.e. the embedding rows needed.
pub fn id_space(tokenizer: &Tokenizer) -> usize {
    tokenizer
        .get_vocab(true)
        .values()
        .max()
        .map_or(0, |&id| id as usize + 1)
}

/// Id of the padding token, falling back to 0.
pub fn pad_id(tokenizer: &Tokenizer) -> u32 {
    PAD_TOKENS
        .iter()
        .find_map(|t| tokenizer.token_to_id(t))
        .unwrap_or(0)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "the cat sat on the mat".to_string(),
            "the dog sat on the log".to_string(),
        ]
    }

    #[test]
    fn test_build_then_load_reuses_file() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        assert!(!store.path().exists());

        store.load_or_build(&corpus(), 200, 16).unwrap();
        assert!(store.path().exists());

        // Second call loads the saved file even with an empty corpus
        let tok = store.load_or_build(&[], 200, 16).unwrap();
        assert!(tok.token_to_id("cat").is_some());
        assert_eq!(pad_id(&tok), 0);
        assert!(id_space(&tok) <= 200);
    }

    #[test]
    fn test_truncates_to_max_len() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let tok   = store.load_or_build(&corpus(), 200, 3).unwrap();

        let enc = tok.encode("the cat sat on the mat", true).unwrap();
        assert_eq!(enc.get_ids().len(), 3);
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let tok   = store.load_or_build(&corpus(), 200, 16).unwrap();

        let enc = tok.encode("zebra", true).unwrap();
        assert_eq!(enc.get_ids(), &[1]);
    }

    #[test]
    fn test_vocab_size_caps_word_count() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        // Room for 2 words: "the" (4×) then "on" (2×, before "sat" alphabetically)
        let tok = store.load_or_build(&corpus(), 106, 16).unwrap();
        assert!(tok.token_to_id("the").is_some());
        assert!(tok.token_to_id("on").is_some());
        assert!(tok.token_to_id("sat").is_none());
    }
}
