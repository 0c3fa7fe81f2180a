// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the `train` subcommand and its flags.
//
// Every flag is optional. Unset flags fall back to the JSON
// file given with --config, then to the built-in defaults
// (TrainConfig::resolve). LoRA flags patch whichever adapter
// config is in effect: the file's, or the default preset.
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::application::config::TrainOptions;
use crate::ml::lora::LoraConfig;
use crate::ml::loss::TripletLossConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune LoRA adapters with a triplet margin loss
    Train(TrainArgs),
}

#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// JSON file with any subset of the training options
    #[arg(long)]
    pub config: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Local model directory or hub id (org/name)
    #[arg(long)]
    pub model_path: Option<String>,

    /// CSV with `sentence` and `id` columns
    #[arg(long)]
    pub data_path: Option<String>,

    /// cpu, cuda, cuda:N, gpu or wgpu
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub num_epochs: Option<usize>,

    /// Tokens per sentence after truncation
    #[arg(long)]
    pub max_len: Option<usize>,

    #[arg(long)]
    pub eval_every: Option<usize>,

    #[arg(long)]
    pub save_model_every: Option<usize>,

    /// Reshuffle anchors every epoch (true/false)
    #[arg(long)]
    pub shuffle: Option<bool>,

    /// Evaluation CSV, defaults to --data-path
    #[arg(long)]
    pub eval_data_path: Option<String>,

    #[arg(long)]
    pub save_model_path: Option<String>,

    #[arg(long)]
    pub model_save_name: Option<String>,

    /// Tracking project, defaults to {model_save_name}-tracking
    #[arg(long)]
    pub wandb_project_name: Option<String>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub tracking_dir: Option<String>,

    /// Steps between adapter gradient/parameter norm logs, 0 disables
    #[arg(long)]
    pub watch_every: Option<usize>,

    /// Upload checkpoints (true/false)
    #[arg(long)]
    pub push_to_hub: Option<bool>,

    /// Mirror checkpoints into this directory instead of the hub
    #[arg(long)]
    pub registry_dir: Option<String>,

    #[arg(long)]
    pub triplet_margin: Option<f64>,

    /// Norm degree of the triplet distance
    #[arg(long)]
    pub triplet_p: Option<f64>,

    #[arg(long)]
    pub lora_rank: Option<usize>,

    #[arg(long)]
    pub lora_alpha: Option<f64>,

    #[arg(long)]
    pub lora_dropout: Option<f64>,

    /// Comma separated, e.g. query,value
    #[arg(long, value_delimiter = ',')]
    pub lora_target_modules: Option<Vec<String>>,
}

impl TrainArgs {
    /// File options (if any) with the flags layered on top.
    pub fn into_options(self) -> Result<TrainOptions> {
        let file = match &self.config {
            Some(path) => TrainOptions::from_json_file(path)?,
            None       => TrainOptions::default(),
        };

        let peft = self.lora_overrides(file.peft_config.clone());
        let loss = self.loss_overrides(file.triplet_loss.clone());

        let flags = TrainOptions {
            model_path:         self.model_path,
            data_path:          self.data_path,
            device:             self.device,
            peft_config:        Some(peft),
            batch_size:         self.batch_size,
            lr:                 self.lr,
            triplet_loss:       loss,
            num_epochs:         self.num_epochs,
            max_len:            self.max_len,
            eval_every:         self.eval_every,
            save_model_every:   self.save_model_every,
            shuffle:            self.shuffle,
            eval_data_path:     self.eval_data_path,
            save_model_path:    self.save_model_path,
            model_save_name:    self.model_save_name,
            wandb_project_name: self.wandb_project_name,
            seed:               self.seed,
            tracking_dir:       self.tracking_dir,
            watch_every:        self.watch_every,
            push_to_hub:        self.push_to_hub,
            registry_dir:       self.registry_dir,
            unrecognized:       Default::default(),
        };

        Ok(file.merge(flags))
    }

    fn lora_overrides(&self, base: Option<LoraConfig>) -> LoraConfig {
        let mut lora = base.unwrap_or_else(LoraConfig::default_preset);
        if let Some(r) = self.lora_rank {
            lora.r = r;
        }
        if let Some(alpha) = self.lora_alpha {
            lora.lora_alpha = alpha;
        }
        if let Some(dropout) = self.lora_dropout {
            lora.lora_dropout = dropout;
        }
        if let Some(modules) = &self.lora_target_modules {
            lora.target_modules = modules.clone();
        }
        lora
    }

    /// None when neither the file nor a flag touches the loss.
    fn loss_overrides(&self, base: Option<TripletLossConfig>) -> Option<TripletLossConfig> {
        if base.is_none() && self.triplet_margin.is_none() && self.triplet_p.is_none() {
            return None;
        }
        let mut loss = base.unwrap_or_default();
        if let Some(margin) = self.triplet_margin {
            loss.margin = margin;
        }
        if let Some(p) = self.triplet_p {
            loss.p = p;
        }
        Some(loss)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::TrainConfig;

    #[test]
    fn test_no_flags_gives_the_preset() {
        let opts = TrainArgs::default().into_options().unwrap();
        assert_eq!(opts.peft_config, Some(LoraConfig::default_preset()));
        assert_eq!(opts.triplet_loss, None);
        assert_eq!(opts.batch_size, None);
    }

    #[test]
    fn test_lora_flags_patch_the_preset() {
        let args = TrainArgs {
            lora_rank:           Some(8),
            lora_target_modules: Some(vec!["query".into(), "value".into()]),
            ..Default::default()
        };
        let lora = args.into_options().unwrap().peft_config.unwrap();
        assert_eq!(lora.r, 8);
        assert_eq!(lora.lora_alpha, 128.0);
        assert_eq!(lora.target_modules, vec!["query", "value"]);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{
            "batch_size": 8,
            "num_epochs": 3,
            "peft_config": {"r": 4, "lora_alpha": 8, "lora_dropout": 0.0, "target_modules": ["dense"]},
            "triplet_loss": {"margin": 0.5}
        }"#).unwrap();

        let args = TrainArgs {
            config:       Some(path.to_str().unwrap().to_string()),
            batch_size:   Some(32),
            lora_alpha:   Some(16.0),
            triplet_p:    Some(1.0),
            ..Default::default()
        };
        let cfg = TrainConfig::resolve(args.into_options().unwrap());

        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.num_epochs, 3);
        let lora = cfg.peft().unwrap();
        assert_eq!((lora.r, lora.lora_alpha), (4, 16.0));
        assert_eq!(lora.target_modules, vec!["dense"]);
        assert_eq!((cfg.triplet_loss.margin, cfg.triplet_loss.p), (0.5, 1.0));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = TrainArgs { config: Some("/nonexistent/train.json".into()), ..Default::default() };
        assert!(args.into_options().is_err());
    }
}
