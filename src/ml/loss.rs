// ============================================================
// Layer 5 - Triplet Margin Loss
// ============================================================
//   d(x, y) = ‖x − y + eps‖_p
//   loss    = mean( max(d(a, p) − d(a, n) + margin, 0) )
//
// Pulls the anchor towards the positive and pushes it away
// from the negative until the gap is at least `margin`.
//
// Reference: Schroff et al. (2015) FaceNet

use burn::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripletLossConfig {
    #[serde(default = "default_margin")]
    pub margin: f64,

    /// Norm degree of the pairwise distance
    #[serde(default = "default_p")]
    pub p: f64,

    #[serde(default = "default_eps")]
    pub eps: f64,
}

fn default_margin() -> f64 { 1.0 }
fn default_p() -> f64 { 2.0 }
fn default_eps() -> f64 { 1e-6 }

impl Default for TripletLossConfig {
    fn default() -> Self {
        Self { margin: default_margin(), p: default_p(), eps: default_eps() }
    }
}

impl TripletLossConfig {
    pub fn init(&self) -> TripletMarginLoss {
        TripletMarginLoss { margin: self.margin, p: self.p, eps: self.eps }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TripletMarginLoss {
    margin: f64,
    p:      f64,
    eps:    f64,
}

impl TripletMarginLoss {
    /// anchor, positive, negative: [batch, dim] → scalar loss [1]
    pub fn forward<B: Backend>(
        &self,
        anchor:   Tensor<B, 2>,
        positive: Tensor<B, 2>,
        negative: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let d_pos = self.distance(anchor.clone(), positive);
        let d_neg = self.distance(anchor, negative);
        (d_pos - d_neg)
            .add_scalar(self.margin)
            .clamp_min(0.0)
            .mean()
    }

    /// Row-wise p-norm distance: [batch, dim] → [batch, 1]
    fn distance<B: Backend>(&self, x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
        let diff = (x - y).add_scalar(self.eps);
        if self.p == 2.0 {
            diff.powf_scalar(2.0).sum_dim(1).sqrt()
        } else {
            diff.abs()
                .powf_scalar(self.p)
                .sum_dim(1)
                .powf_scalar(1.0 / self.p)
        }
    }
}
