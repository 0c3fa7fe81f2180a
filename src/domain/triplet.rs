// ============================================================
// Layer 3 - Triplet Domain Types
// ============================================================
// A training table is a list of sentences tagged with a group
// id. Two sentences with the same id are "similar"; sentences
// with different ids are "dissimilar". Triplets are sampled
// from that table once per epoch.

use serde::{Deserialize, Serialize};

/// One row of the training or evaluation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSentence {
    /// The raw sentence text
    pub sentence: String,

    /// Group label; rows sharing an id are positives of each other
    pub id: String,
}

impl LabeledSentence {
    pub fn new(sentence: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            sentence: sentence.into(),
            id:       id.into(),
        }
    }
}

/// (anchor, positive, negative) text triple consumed by one training step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triplet {
    pub anchor:   String,
    pub positive: String,
    pub negative: String,
}

impl Triplet {
    pub fn new(
        anchor:   impl Into<String>,
        positive: impl Into<String>,
        negative: impl Into<String>,
    ) -> Self {
        Self {
            anchor:   anchor.into(),
            positive: positive.into(),
            negative: negative.into(),
        }
    }
}

/// Split a table into the parallel (sentences, labels) columns the
/// evaluator works on.
pub fn into_columns(rows: Vec<LabeledSentence>) -> (Vec<String>, Vec<String>) {
    rows.into_iter().map(|r| (r.sentence, r.id)).unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_columns_keeps_order() {
        let rows = vec![
            LabeledSentence::new("a", "1"),
            LabeledSentence::new("b", "2"),
            LabeledSentence::new("c", "1"),
        ];
        let (sentences, labels) = into_columns(rows);
        assert_eq!(sentences, vec!["a", "b", "c"]);
        assert_eq!(labels,    vec!["1", "2", "1"]);
    }
}
