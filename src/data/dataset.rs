use std::collections::BTreeMap;

use crate::domain::triplet::LabeledSentence;

/// The in-memory training table: cleaned sentences with group ids.
#[derive(Debug, Clone, Default)]
pub struct SentenceTable {
    rows: Vec<LabeledSentence>,
}

impl SentenceTable {
    pub fn new(rows: Vec<LabeledSentence>) -> Self { Self { rows } }

    pub fn rows(&self) -> &[LabeledSentence] { &self.rows }

    /// Row indices per group id, ordered by id
    pub fn groups(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            groups.entry(row.id.as_str()).or_default().push(i);
        }
        groups
    }

    /// Every sentence, in table order
    pub fn corpus(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.sentence.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_collect_indices_by_id() {
        let table = SentenceTable::new(vec![
            LabeledSentence::new("a", "x"),
            LabeledSentence::new("b", "y"),
            LabeledSentence::new("c", "x"),
        ]);
        let groups = table.groups();
        assert_eq!(groups["x"], vec![0, 2]);
        assert_eq!(groups["y"], vec![1]);
        assert_eq!(table.rows().len(), 3);
        assert_eq!(table.corpus(), vec!["a", "b", "c"]);
    }
}
