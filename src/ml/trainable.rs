// ============================================================
// Layer 5 - Trainable Encoder
// ============================================================
// Burn-backed implementation of TripletModel.
//
// One training step:
//   1. Embed anchor, positive and negative (three forward passes
//      through the same encoder)
//   2. Triplet margin loss
//   3. Backward pass, gradients for adapter parameters only
//      (base weights are frozen)
//   4. AdamW update
//
// Evaluation runs on model.valid(): the inner backend, no
// autodiff graph, dropout disabled.
//
// Reference: Burn Book §5 (Custom Training Loop)
//            Loshchilov & Hutter (2019) AdamW

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use indicatif::ProgressBar;
use std::path::Path;

use crate::data::batcher::{TextBatcher, TripletBatch};
use crate::domain::traits::{StepOutcome, TripletModel};
use crate::ml::lora::{LoraConfig, PeftAdapterConfig};
use crate::ml::loss::TripletMarginLoss;
use crate::ml::model::SentenceEncoder;
use crate::ml::progress;

pub struct TrainableEncoder<B: AutodiffBackend, O> {
    model:      SentenceEncoder<B>,
    optim:      O,
    loss:       TripletMarginLoss,
    lr:         f64,
    batcher:    TextBatcher<B>,
    device:     B::Device,
    lora:       LoraConfig,
    base_model: String,
}

impl<B, O> TrainableEncoder<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SentenceEncoder<B>, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model:      SentenceEncoder<B>,
        optim:      O,
        loss:       TripletMarginLoss,
        lr:         f64,
        batcher:    TextBatcher<B>,
        device:     B::Device,
        lora:       LoraConfig,
        base_model: impl Into<String>,
    ) -> Self {
        Self { model, optim, loss, lr, batcher, device, lora, base_model: base_model.into() }
    }

    #[cfg(test)]
    pub fn model(&self) -> &SentenceEncoder<B> {
        &self.model
    }

    fn adapter_grad_norm(&self, grads: &GradientsParams) -> f64 {
        self.model
            .adapters()
            .iter()
            .map(|(_, adapter)| adapter.grad_sq_norm(grads))
            .sum::<f64>()
            .sqrt()
    }
}

impl<B, O> TripletModel for TrainableEncoder<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SentenceEncoder<B>, B>,
{
    type Batch = TripletBatch<B>;

    fn train_step(&mut self, batch: TripletBatch<B>) -> Result<StepOutcome> {
        let anchor   = self.model.forward(batch.anchor.input_ids,   batch.anchor.attention_mask);
        let positive = self.model.forward(batch.positive.input_ids, batch.positive.attention_mask);
        let negative = self.model.forward(batch.negative.input_ids, batch.negative.attention_mask);

        let loss     = self.loss.forward(anchor, positive, negative);
        let loss_val = loss.clone().into_scalar().elem::<f64>();

        // Gradients are consumed by the step; nothing to zero afterwards
        let grads     = GradientsParams::from_grads(loss.backward(), &self.model);
        let grad_norm = self.adapter_grad_norm(&grads);
        self.model    = self.optim.step(self.lr, self.model.clone(), grads);

        Ok(StepOutcome { loss: loss_val, grad_norm })
    }

    fn embed_sentences(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>> {
        let model   = self.model.valid();
        let batcher = self.batcher.to_backend::<B::InnerBackend>(self.device.clone());

        let bar: ProgressBar = progress::bar(sentences.len(), "sentences");
        let mut embeddings = Vec::with_capacity(sentences.len());
        for sentence in sentences {
            let batch = batcher.batch(vec![sentence.clone()])?;
            let embedding = model
                .forward(batch.input_ids, batch.attention_mask)
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("Cannot read embedding: {e:?}"))?;
            embeddings.push(embedding);
            bar.inc(1);
        }
        bar.finish_and_clear();

        Ok(embeddings)
    }

    fn save_adapter(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let path = dir.join("adapter_model");
        CompactRecorder::new()
            .record(self.model.adapter_stack().into_record(), path.clone())
            .with_context(|| format!("Failed to record adapter to '{}'", path.display()))?;

        let layers = self.model.adapters().into_iter().map(|(name, _)| name).collect();
        let config = PeftAdapterConfig::new(&self.lora, Some(&self.base_model), layers);
        let config_path = dir.join("adapter_config.json");
        std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)
            .with_context(|| format!("Cannot write '{}'", config_path.display()))?;

        Ok(())
    }

    fn adapter_param_norm(&self) -> Result<f64> {
        Ok(self
            .model
            .adapters()
            .iter()
            .map(|(_, adapter)| adapter.param_sq_norm())
            .sum::<f64>()
            .sqrt())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::TextBatch;
    use crate::infra::tokenizer_store::TokenizerStore;
    use crate::ml::loss::TripletLossConfig;
    use crate::ml::model::tests::tiny_config;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamWConfig;
    use std::sync::Arc;

    type TestBackend = Autodiff<NdArray>;

    fn text(ids: &[i32], device: &<TestBackend as Backend>::Device) -> TextBatch<TestBackend> {
        let n = ids.len();
        TextBatch {
            input_ids:      Tensor::<TestBackend, 1, Int>::from_ints(ids, device).reshape([1, n]),
            attention_mask: Tensor::<TestBackend, 1, Int>::ones([n], device).reshape([1, n]),
        }
    }

    fn trainable(dir: &Path) -> TrainableEncoder<TestBackend, impl Optimizer<SentenceEncoder<TestBackend>, TestBackend>> {
        let device = Default::default();
        let lora   = LoraConfig::new(2, 4.0, 0.0, ["query", "value"]);
        let model  = tiny_config()
            .init::<TestBackend>(&device)
            .with_adapters(&lora, &device)
            .freeze_base();

        // No room for words below id 32, so every word maps to [UNK]
        let corpus = vec!["alpha beta".to_string(), "gamma".to_string()];
        let tok = TokenizerStore::new(dir).load_or_build(&corpus, 32, 8).unwrap();

        TrainableEncoder::new(
            model,
            AdamWConfig::new().with_weight_decay(0.01).init::<TestBackend, SentenceEncoder<TestBackend>>(),
            TripletLossConfig::default().init(),
            1e-2,
            TextBatcher::new(Arc::new(tok), 0, Default::default()),
            device,
            lora,
            "tiny",
        )
    }

    #[test]
    fn test_step_updates_adapters_but_not_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainable(dir.path());
        let device = Default::default();

        let base_before: Vec<f32> = t.model().layers[0].attention.query.base.weight.val().into_data().to_vec().unwrap();
        assert!(t.adapter_param_norm().unwrap() > 0.0);
        let lora_b_before: f32 = t.model().layers[0].attention.query.adapter.as_ref().unwrap()
            .lora_b.weight.val().abs().sum().into_scalar();
        assert_eq!(lora_b_before, 0.0);

        // anchor == negative, so d(a, n) ≈ 0 and the loss is at least the margin
        let batch = TripletBatch {
            anchor:   text(&[3, 4, 5], &device),
            positive: text(&[9, 10], &device),
            negative: text(&[3, 4, 5], &device),
        };
        let outcome = t.train_step(batch).unwrap();
        assert!(outcome.loss >= 1.0);
        assert!(outcome.grad_norm > 0.0);

        let base_after: Vec<f32> = t.model().layers[0].attention.query.base.weight.val().into_data().to_vec().unwrap();
        assert_eq!(base_before, base_after);

        let lora_b_after: f32 = t.model().layers[0].attention.query.adapter.as_ref().unwrap()
            .lora_b.weight.val().abs().sum().into_scalar();
        assert!(lora_b_after > 0.0);
    }

    #[test]
    fn test_embed_sentences_one_vector_each() {
        let dir = tempfile::tempdir().unwrap();
        let t = trainable(dir.path());
        let sentences = vec!["alpha".to_string(), "beta gamma".to_string(), String::new()];
        let emb = t.embed_sentences(&sentences).unwrap();
        assert_eq!(emb.len(), 3);
        assert!(emb.iter().all(|e| e.len() == tiny_config().hidden_size));
    }

    #[test]
    fn test_save_adapter_writes_weights_and_config() {
        let dir  = tempfile::tempdir().unwrap();
        let t    = trainable(dir.path());
        let ckpt = dir.path().join("lora_tiny_1");
        t.save_adapter(&ckpt).unwrap();

        assert!(ckpt.join("adapter_model.mpk").exists());
        let cfg: PeftAdapterConfig =
            serde_json::from_str(&std::fs::read_to_string(ckpt.join("adapter_config.json")).unwrap()).unwrap();
        assert_eq!(cfg.r, 2);
        assert_eq!(cfg.base_model_name_or_path.as_deref(), Some("tiny"));
        assert_eq!(cfg.adapted_layers.len(), 4);
    }
}
