// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The training driver is written against these traits only.
// The Burn-backed model, the CSV triplet loader, the run
// tracker and the hub uploader each implement one of them,
// and the driver tests swap in small in-memory versions.

use anyhow::Result;
use std::path::Path;

// ─── TripletModel ─────────────────────────────────────────────────────────────
/// Result of one optimisation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Scalar triplet loss for the batch
    pub loss: f64,

    /// L2 norm of the adapter gradients that were applied
    pub grad_norm: f64,
}

/// A trainable embedding model with an adapter sub-module.
///
/// Implementations:
///   - TrainableEncoder → LoRA-adapted sentence encoder on a Burn backend
pub trait TripletModel {
    /// Whatever the sampler hands over for one step
    type Batch;

    /// Embed anchor, positive and negative, apply the triplet loss,
    /// back-propagate and take one optimiser step.
    fn train_step(&mut self, batch: Self::Batch) -> Result<StepOutcome>;

    /// One embedding per sentence, one forward pass per sentence.
    fn embed_sentences(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Write the adapter weights and adapter config (never the base model) into `dir`.
    fn save_adapter(&self, dir: &Path) -> Result<()>;

    /// L2 norm of all trainable (adapter) parameters
    fn adapter_param_norm(&self) -> Result<f64>;
}

// ─── TripletSource ────────────────────────────────────────────────────────────
/// Builds a fresh triplet sampler at the start of every epoch, so
/// shuffling is re-applied each time.
///
/// Turning a batch of sentences into tensors can fail (tokenizer
/// errors), so the sampler yields `Result`s.
pub trait TripletSource {
    type Batch;
    type Sampler: ExactSizeIterator<Item = Result<Self::Batch>>;

    fn epoch_sampler(&self, epoch: usize) -> Result<Self::Sampler>;
}

// ─── ExperimentTracker ────────────────────────────────────────────────────────
/// Side-channel sink for run configuration and metrics.
pub trait ExperimentTracker {
    /// Record the one-time configuration snapshot for the run
    fn log_config(&mut self, snapshot: &serde_json::Value) -> Result<()>;

    /// Record metric values observed at a global step
    fn log(&mut self, step: usize, metrics: &[(&str, f64)]) -> Result<()>;
}

// ─── AdapterRegistry ──────────────────────────────────────────────────────────
/// Remote (or mirrored) home for saved adapters.
///
/// Implementations:
///   - HubRegistry      → HuggingFace Hub over HTTP
///   - LocalRegistry    → a directory acting as the registry
///   - DisabledRegistry → uploads switched off
pub trait AdapterRegistry {
    /// Upload every file in `local_dir` under repository `name`.
    /// Returns a human-readable location of the pushed adapter.
    fn push(&self, local_dir: &Path, name: &str) -> Result<String>;
}
