// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates a fine-tuning run in order:
//
//   Step 1: Validate the resolved config     (Layer 2)
//   Step 2: Load training + eval tables      (Layer 4 - data)
//   Step 3: Pick the adapter registry        (Layer 6 - infra)
//   Step 4: Prepare the checkpoint directory (Layer 6 - infra)
//   Step 5: Pick the backend for the device, then
//             load encoder + tokenizer       (Layer 5 - ml)
//             build sampler, batcher, AdamW  (Layer 4/5)
//             open the tracking run          (Layer 6 - infra)
//             run the training loop          (Layer 5 - ml)
//
// The registry is selected before the model is loaded so a
// missing hub token stops the run before any work is done.
//
// Reference: Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    optim::AdamWConfig,
    tensor::backend::AutodiffBackend,
};
use std::path::Path;
use std::sync::Arc;

use crate::application::config::{DeviceSpec, TrainConfig};
use crate::data::{
    batcher::{TextBatcher, TripletLoader},
    dataset::SentenceTable,
    loader::{load_dataset, load_labeled_sentences},
    triplet_sampler::SamplerConfig,
};
use crate::domain::run_state::RunState;
use crate::domain::traits::ExperimentTracker;
use crate::domain::triplet::into_columns;
use crate::infra::{
    checkpoint::CheckpointManager,
    registry::Registry,
    tracker::{new_run_id, FileTracker},
};
use crate::ml::{
    lora::LoraConfig,
    model::SentenceEncoder,
    provider::{get_model, ModelRequest},
    trainable::TrainableEncoder,
    trainer::{run_training, EvalSet, LoopSettings},
};

/// Everything loaded before a backend is chosen.
struct Prepared {
    table:          SentenceTable,
    eval_sentences: Vec<String>,
    eval_labels:    Vec<String>,
    registry:       Registry,
    checkpoints:    CheckpointManager,
}

pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Run the whole fine-tuning pipeline; returns the final loop state.
    pub fn execute(&self) -> Result<RunState> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;
        let lora   = cfg.peft()?;
        let device = cfg.device_spec()?;
        for key in cfg.unrecognized.keys() {
            tracing::warn!("Ignoring unrecognized option '{key}'");
        }

        // ── Step 2: Data ──────────────────────────────────────────────────────
        let table = load_dataset(&cfg.data_path)?;
        tracing::info!(
            "Training table: {} sentences in {} groups",
            table.rows().len(),
            table.groups().len(),
        );

        let eval_rows = load_labeled_sentences(&cfg.eval_data_path)
            .with_context(|| format!("Cannot load evaluation table '{}'", cfg.eval_data_path))?;
        let (eval_sentences, eval_labels) = into_columns(eval_rows);

        // ── Step 3: Registry ──────────────────────────────────────────────────
        let registry = Registry::select(cfg.push_to_hub, cfg.registry_dir.as_deref())?;

        // ── Step 4: Checkpoint directory ──────────────────────────────────────
        let checkpoints = CheckpointManager::new(&cfg.save_model_path, &cfg.model_save_name)?;
        if let Some(step) = checkpoints.latest_step()? {
            tracing::warn!(
                "'{}' already holds checkpoints up to step {step}; matching steps will be overwritten",
                cfg.save_model_path,
            );
        }

        let prepared = Prepared { table, eval_sentences, eval_labels, registry, checkpoints };

        // ── Step 5: Backend ───────────────────────────────────────────────────
        tracing::info!("Using device {device}");
        match device {
            DeviceSpec::Cpu    => run::<Autodiff<NdArray>>(cfg, lora, prepared, NdArrayDevice::Cpu),
            DeviceSpec::Gpu(i) => run::<Autodiff<Wgpu>>(cfg, lora, prepared, WgpuDevice::DiscreteGpu(i)),
        }
    }
}

fn run<B: AutodiffBackend>(
    cfg:      &TrainConfig,
    lora:     &LoraConfig,
    prepared: Prepared,
    device:   B::Device,
) -> Result<RunState> {
    let Prepared { table, eval_sentences, eval_labels, registry, checkpoints } = prepared;

    // ── Encoder + tokenizer ───────────────────────────────────────────────────
    let corpus = table.corpus();
    let loaded = get_model::<B>(
        &ModelRequest {
            model_path: &cfg.model_path,
            lora,
            max_len: cfg.max_len,
            corpus: &corpus,
            tokenizer_fallback_dir: Path::new(&cfg.save_model_path).join("tokenizer"),
        },
        &device,
    )?;
    tracing::info!(
        "Sentences truncated to {} tokens, embeddings of size {}",
        loaded.max_len,
        loaded.config.hidden_size,
    );

    // ── Triplet batches ───────────────────────────────────────────────────────
    let batcher = TextBatcher::<B>::new(Arc::new(loaded.tokenizer), loaded.pad_id, device.clone());
    let source  = TripletLoader::new(
        Arc::new(table),
        batcher.clone(),
        SamplerConfig { batch_size: cfg.batch_size, shuffle: cfg.shuffle, seed: cfg.seed },
    );

    // ── Optimizer + trainable model ───────────────────────────────────────────
    let optim = AdamWConfig::new()
        .with_weight_decay(0.01)
        .init::<B, SentenceEncoder<B>>();
    let mut model = TrainableEncoder::new(
        loaded.encoder,
        optim,
        cfg.triplet_loss.init(),
        cfg.lr,
        batcher,
        device,
        lora.clone(),
        &cfg.model_path,
    );

    // ── Tracking ──────────────────────────────────────────────────────────────
    let mut tracker = FileTracker::new(&cfg.tracking_dir, &cfg.wandb_project_name, &new_run_id())?;
    tracker.log_config(&cfg.tracking_snapshot()?)?;
    tracing::info!("Tracking run in '{}', metrics in '{}'", tracker.run_dir().display(), tracker.csv_path().display());

    // ── Loop ──────────────────────────────────────────────────────────────────
    let settings = LoopSettings {
        num_epochs:       cfg.num_epochs,
        eval_every:       cfg.eval_every,
        save_model_every: cfg.save_model_every,
        watch_every:      cfg.watch_every,
    };
    let eval = EvalSet { sentences: &eval_sentences, labels: &eval_labels };

    run_training(&settings, &mut model, &source, &eval, &mut tracker, &checkpoints, &registry)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::TrainOptions;
    use crate::ml::model::tests::tiny_config;

    const TABLE: &str = "sentence,id\n\
        red apple,fruit\n\
        green apple,fruit\n\
        ripe banana,fruit\n\
        fast car,vehicle\n\
        old truck,vehicle\n\
        blue bus,vehicle\n";

    fn options(root: &Path) -> TrainOptions {
        let model_dir = root.join("tiny-model");
        std::fs::create_dir_all(&model_dir).unwrap();
        let mut encoder = tiny_config();
        encoder.vocab_size = 200;
        std::fs::write(model_dir.join("config.json"), serde_json::to_string(&encoder).unwrap()).unwrap();

        let data = root.join("data.csv");
        std::fs::write(&data, TABLE).unwrap();

        let path = |p: &Path| p.to_str().unwrap().to_string();
        TrainOptions {
            model_path:      Some(path(&model_dir)),
            data_path:       Some(path(&data)),
            device:          Some("cpu".into()),
            peft_config:     Some(LoraConfig::new(2, 4.0, 0.0, ["query", "value"])),
            batch_size:      Some(2),
            lr:              Some(1e-3),
            num_epochs:      Some(2),
            max_len:         Some(8),
            eval_every:      Some(100),
            save_model_every: Some(2),
            save_model_path: Some(path(&root.join("out"))),
            tracking_dir:    Some(path(&root.join("runs"))),
            push_to_hub:     Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_on_cpu() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig::resolve(options(dir.path()));
        assert_eq!(cfg.model_save_name, "tiny-model");

        let state = TrainUseCase::new(cfg).execute().unwrap();

        // 6 anchors / batch 2 = 3 steps per epoch
        assert_eq!(state.steps, 6);
        // end of each epoch only
        assert_eq!(state.evaluations, 2);
        // steps 2, 3 (epoch end), 4, 6
        assert_eq!(state.checkpoints, 4);

        let out = dir.path().join("out");
        assert!(out.join("lora_tiny-model_2").join("adapter_config.json").exists());
        assert!(out.join("lora_tiny-model_6").join("adapter_model.mpk").exists());
        assert!(out.join("tokenizer").join("tokenizer.json").exists());

        let project = dir.path().join("runs").join("tiny-model-tracking");
        let run_dirs: Vec<_> = std::fs::read_dir(project).unwrap().collect();
        assert_eq!(run_dirs.len(), 1);
    }

    #[test]
    fn test_invalid_config_fails_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.peft_config = None;
        opts.data_path   = Some("/nonexistent/data.csv".into());

        let err = TrainUseCase::new(TrainConfig::resolve(opts)).execute().unwrap_err();
        assert!(err.to_string().contains("peft_config"));
    }

    #[test]
    fn test_missing_eval_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.eval_data_path = Some(dir.path().join("missing.csv").to_str().unwrap().to_string());

        assert!(TrainUseCase::new(TrainConfig::resolve(opts)).execute().is_err());
        assert!(!dir.path().join("out").exists());
    }
}
