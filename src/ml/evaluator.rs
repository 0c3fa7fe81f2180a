// ============================================================
// Layer 5 - Embedding Evaluator
// ============================================================
// Measures how well embeddings cluster by group label:
//
//   average_inner_distance  - mean distance between sentences of the same group
//   average_across_distance - mean distance between sentences of different groups
//   accuracy                - leave-one-out nearest-neighbour label accuracy
//
// Training should push inner distances down and across
// distances up; accuracy follows.

use anyhow::{ensure, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceReport {
    pub average_inner_distance:  f64,
    pub average_across_distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalReport {
    pub average_inner_distance:  f64,
    pub average_across_distance: f64,
    pub accuracy:                f64,
}

impl EvalReport {
    pub fn metrics(&self) -> [(&'static str, f64); 3] {
        [
            ("average_inner_distance",  self.average_inner_distance),
            ("average_across_distance", self.average_across_distance),
            ("accuracy",                self.accuracy),
        ]
    }
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn check_inputs(embeddings: &[Vec<f32>], labels: &[String]) -> Result<()> {
    ensure!(
        embeddings.len() == labels.len(),
        "got {} embeddings for {} labels",
        embeddings.len(),
        labels.len(),
    );
    if let Some(first) = embeddings.first() {
        ensure!(
            embeddings.iter().all(|e| e.len() == first.len()),
            "embeddings have inconsistent dimensions",
        );
    }
    Ok(())
}

/// Mean pairwise distance within and across groups.
/// A side with no pairs (e.g. every label unique) reports 0.0.
pub fn calculate_distances(embeddings: &[Vec<f32>], labels: &[String]) -> Result<DistanceReport> {
    check_inputs(embeddings, labels)?;

    let (mut inner_sum, mut inner_n) = (0.0f64, 0usize);
    let (mut across_sum, mut across_n) = (0.0f64, 0usize);

    for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            let d = euclidean(&embeddings[i], &embeddings[j]);
            if labels[i] == labels[j] {
                inner_sum += d;
                inner_n   += 1;
            } else {
                across_sum += d;
                across_n   += 1;
            }
        }
    }

    let mean = |sum: f64, n: usize| if n > 0 { sum / n as f64 } else { 0.0 };
    Ok(DistanceReport {
        average_inner_distance:  mean(inner_sum, inner_n),
        average_across_distance: mean(across_sum, across_n),
    })
}

/// Fraction of sentences whose nearest other sentence carries the same label.
pub fn calculate_accuracy(embeddings: &[Vec<f32>], labels: &[String]) -> Result<f64> {
    check_inputs(embeddings, labels)?;
    if embeddings.len() < 2 {
        return Ok(0.0);
    }

    let correct = (0..embeddings.len())
        .filter(|&i| {
            let nearest = (0..embeddings.len())
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(&embeddings[i], &embeddings[j])))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(j, _)| j);
            nearest.is_some_and(|j| labels[j] == labels[i])
        })
        .count();

    Ok(correct as f64 / embeddings.len() as f64)
}

pub fn evaluate(embeddings: &[Vec<f32>], labels: &[String]) -> Result<EvalReport> {
    let distances = calculate_distances(embeddings, labels)?;
    let accuracy  = calculate_accuracy(embeddings, labels)?;
    Ok(EvalReport {
        average_inner_distance:  distances.average_inner_distance,
        average_across_distance: distances.average_across_distance,
        accuracy,
    })
}
