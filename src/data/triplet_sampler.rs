// ============================================================
// Layer 4 - Triplet Sampler
// ============================================================
// Turns the sentence table into batches of
// (anchor, positive, negative) triplets for one epoch:
//
//   anchor   - every sentence whose group has at least two members
//   positive - another sentence from the anchor's group
//   negative - a sentence from any other group
//
// A new sampler is built at the start of every epoch. Its RNG
// is seeded from (seed + epoch), so each epoch draws a fresh
// shuffle and fresh pairings while whole runs stay reproducible.

use anyhow::{bail, Result};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::data::dataset::SentenceTable;
use crate::domain::triplet::Triplet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub batch_size: usize,
    pub shuffle:    bool,
    pub seed:       u64,
}

/// Iterator over one epoch's triplet batches. The length is known
/// before iteration starts.
#[derive(Debug)]
pub struct TripletSampler {
    batches: std::vec::IntoIter<Vec<Triplet>>,
}

impl TripletSampler {
    pub fn new(table: &SentenceTable, cfg: SamplerConfig, epoch: usize) -> Result<Self> {
        if cfg.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }

        let rows   = table.rows();
        let groups = table.groups();
        if groups.len() < 2 {
            bail!(
                "need sentences from at least two groups to draw negatives, found {}",
                groups.len()
            );
        }

        let mut anchors: Vec<usize> = (0..rows.len())
            .filter(|&i| groups[rows[i].id.as_str()].len() >= 2)
            .collect();
        if anchors.is_empty() {
            bail!("no group has two or more sentences, so no positive pair can be drawn");
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(epoch as u64));
        if cfg.shuffle {
            anchors.shuffle(&mut rng);
        }

        let triplets: Vec<Triplet> = anchors
            .into_iter()
            .map(|a| {
                let group = &groups[rows[a].id.as_str()];

                // Uniform over the group minus the anchor itself
                let pick = rng.gen_range(0..group.len() - 1);
                let pos_slot = group.iter().position(|&i| i == a).unwrap_or(0);
                let p = group[if pick >= pos_slot { pick + 1 } else { pick }];

                // Rejection sampling; at least one other group exists
                let n = loop {
                    let candidate = rng.gen_range(0..rows.len());
                    if rows[candidate].id != rows[a].id {
                        break candidate;
                    }
                };

                Triplet::new(
                    rows[a].sentence.clone(),
                    rows[p].sentence.clone(),
                    rows[n].sentence.clone(),
                )
            })
            .collect();

        let batches: Vec<Vec<Triplet>> = triplets
            .chunks(cfg.batch_size)
            .map(<[Triplet]>::to_vec)
            .collect();

        tracing::debug!(
            "Epoch {}: {} triplets in {} batches",
            epoch + 1,
            triplets.len(),
            batches.len(),
        );

        Ok(Self { batches: batches.into_iter() })
    }
}

impl Iterator for TripletSampler {
    type Item = Vec<Triplet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.batches.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

impl ExactSizeIterator for TripletSampler {}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::triplet::LabeledSentence;
    use std::collections::HashMap;

    fn table() -> SentenceTable {
        SentenceTable::new(vec![
            LabeledSentence::new("a1", "a"),
            LabeledSentence::new("a2", "a"),
            LabeledSentence::new("a3", "a"),
            LabeledSentence::new("b1", "b"),
            LabeledSentence::new("b2", "b"),
            LabeledSentence::new("c1", "c"),
        ])
    }

    fn cfg(batch_size: usize, shuffle: bool) -> SamplerConfig {
        SamplerConfig { batch_size, shuffle, seed: 7 }
    }

    #[test]
    fn test_len_counts_batches_including_short_last_one() {
        // 5 anchors (c1 is a singleton) in batches of 2 → 3 batches
        let sampler = TripletSampler::new(&table(), cfg(2, false), 0).unwrap();
        assert_eq!(sampler.len(), 3);
        let sizes: Vec<usize> = sampler.map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_triplets_respect_groups() {
        let labels: HashMap<String, String> = table()
            .rows()
            .iter()
            .map(|r| (r.sentence.clone(), r.id.clone()))
            .collect();

        for epoch in 0..5 {
            for batch in TripletSampler::new(&table(), cfg(4, true), epoch).unwrap() {
                for t in batch {
                    assert_ne!(t.anchor, t.positive);
                    assert_eq!(labels[&t.anchor], labels[&t.positive]);
                    assert_ne!(labels[&t.anchor], labels[&t.negative]);
                }
            }
        }
    }

    #[test]
    fn test_unshuffled_keeps_table_order_of_anchors() {
        let anchors: Vec<String> = TripletSampler::new(&table(), cfg(10, false), 0)
            .unwrap()
            .flatten()
            .map(|t| t.anchor)
            .collect();
        assert_eq!(anchors, vec!["a1", "a2", "a3", "b1", "b2"]);
    }

    #[test]
    fn test_same_seed_and_epoch_is_reproducible() {
        let run = |epoch| -> Vec<Triplet> {
            TripletSampler::new(&table(), cfg(3, true), epoch).unwrap().flatten().collect()
        };
        assert_eq!(run(2), run(2));
    }

    #[test]
    fn test_single_group_is_rejected() {
        let t = SentenceTable::new(vec![
            LabeledSentence::new("x", "1"),
            LabeledSentence::new("y", "1"),
        ]);
        assert!(TripletSampler::new(&t, cfg(2, false), 0).is_err());
    }

    #[test]
    fn test_all_singletons_are_rejected() {
        let t = SentenceTable::new(vec![
            LabeledSentence::new("x", "1"),
            LabeledSentence::new("y", "2"),
        ]);
        assert!(TripletSampler::new(&t, cfg(2, false), 0).is_err());
    }
}
