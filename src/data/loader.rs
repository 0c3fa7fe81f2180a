// ============================================================
// Layer 4 - Table Loader
// ============================================================
// Reads a labelled sentence table from CSV. The file needs a
// header row with at least a `sentence` and an `id` column;
// any other columns are ignored.
//
//   sentence,id
//   "How do I reset my password?",12
//   "I forgot my password",12
//   "Where is my invoice?",7
//
// Rows whose sentence is empty after cleaning are dropped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::data::{dataset::SentenceTable, preprocessor::Preprocessor};
use crate::domain::triplet::LabeledSentence;

#[derive(Debug, Deserialize)]
struct Row {
    sentence: String,
    id:       String,
}

/// Load the (sentence, id) table used for evaluation.
pub fn load_labeled_sentences(path: impl AsRef<Path>) -> Result<Vec<LabeledSentence>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open table '{}'", path.display()))?;

    let prep = Preprocessor::new();
    let mut rows    = Vec::new();
    let mut dropped = 0usize;

    for (line, record) in reader.deserialize::<Row>().enumerate() {
        // +2: one for the header, one for 1-based line numbers
        let row = record
            .with_context(|| format!("Bad row at line {} of '{}'", line + 2, path.display()))?;
        let sentence = prep.clean(&row.sentence);
        if sentence.is_empty() {
            dropped += 1;
            continue;
        }
        rows.push(LabeledSentence::new(sentence, row.id.trim()));
    }

    if dropped > 0 {
        tracing::warn!("Dropped {} empty sentences from '{}'", dropped, path.display());
    }
    tracing::info!("Loaded {} sentences from '{}'", rows.len(), path.display());
    Ok(rows)
}

/// Load the training table.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<SentenceTable> {
    let rows = load_labeled_sentences(path)?;
    Ok(SentenceTable::new(rows))
}
