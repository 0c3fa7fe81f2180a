// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Decides where adapter checkpoints go and keeps a pointer to
// the most recent one.
//
// What gets saved per checkpoint (by the model):
//   1. adapter_model.mpk - adapter weights only, CompactRecorder
//   2. adapter_config.json  - LoRA hyperparameters (PEFT schema)
//
// File naming convention:
//   {save_model_path}/
//     lora_{name}_150/      ← adapter after global step 150
//     lora_{name}_300/
//     ...
//     latest_step.json      ← step of the most recent checkpoint
//
// Checkpoints are never rotated; every trigger adds a directory.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::domain::traits::TripletModel;

pub struct CheckpointManager {
    /// Kept as given, so derived paths match the configured prefix exactly
    save_model_path: String,
    name:            String,
}

impl CheckpointManager {
    /// Creates `save_model_path` (and parents) if needed.
    pub fn new(save_model_path: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let save_model_path = save_model_path.into();
        fs::create_dir_all(&save_model_path)
            .with_context(|| format!("Cannot create checkpoint directory '{save_model_path}'"))?;
        Ok(Self { save_model_path, name: name.into() })
    }

    /// `{save_model_path}/lora_{name}_{step}`
    pub fn checkpoint_path(&self, step: usize) -> PathBuf {
        PathBuf::from(format!("{}/lora_{}_{}", self.save_model_path, self.name, step))
    }

    /// Registry repository name for this run's adapters
    pub fn hub_name(&self) -> String {
        format!("LoRa_{}", self.name)
    }

    /// Have the model write its adapter for `step`, then move the
    /// latest-step pointer. Returns the checkpoint directory.
    pub fn save<M: TripletModel>(&self, model: &M, step: usize) -> Result<PathBuf> {
        let path = self.checkpoint_path(step);
        model
            .save_adapter(&path)
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let latest = PathBuf::from(&self.save_model_path).join("latest_step.json");
        fs::write(&latest, serde_json::to_string(&step)?)
            .with_context(|| format!("Failed to write '{}'", latest.display()))?;

        tracing::info!("Saved adapter checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Step of the most recent checkpoint, if any was written
    pub fn latest_step(&self) -> Result<Option<usize>> {
        let path = PathBuf::from(&self.save_model_path).join("latest_step.json");
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(Some(serde_json::from_str::<usize>(&s)?))
    }
}
