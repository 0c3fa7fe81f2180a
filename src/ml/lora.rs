// ============================================================
// Layer 5 - LoRA Adapters
// ============================================================
// Low-rank adaptation of a frozen linear layer:
//
//   y = W·x + (alpha / r) · B(A(dropout(x)))
//
//   W : frozen base weight          [d_in → d_out]
//   A : trainable down-projection   [d_in → r]
//   B : trainable up-projection     [r → d_out], zero-initialised
//
// B starts at zero, so an adapted layer is exactly the base
// layer until the first optimiser step touches it.
//
// Only linear slots whose name appears in `target_modules`
// receive an adapter. The encoder names its slots after the
// BERT modules: query, key, value and dense.
//
// Reference: Hu et al. (2021) LoRA
//            Burn Book §3 (Modules)

use burn::{
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

/// Linear slot names the encoder can adapt.
pub const ADAPTABLE_MODULES: [&str; 4] = ["query", "key", "value", "dense"];

// ─── Adapter configuration ────────────────────────────────────────────────────
/// Hyperparameters of the adapter, named after the PEFT fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraConfig {
    /// Rank of the A·B decomposition
    pub r: usize,

    /// Scaling numerator; the adapter output is multiplied by alpha / r
    pub lora_alpha: f64,

    /// Dropout applied to the adapter input only
    pub lora_dropout: f64,

    /// Linear slot names that receive an adapter
    pub target_modules: Vec<String>,

    #[serde(default = "default_bias")]
    pub bias: String,

    #[serde(default)]
    pub inference_mode: bool,
}

fn default_bias() -> String {
    "none".to_string()
}

impl LoraConfig {
    pub fn new(
        r:              usize,
        lora_alpha:     f64,
        lora_dropout:   f64,
        target_modules: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            r,
            lora_alpha,
            lora_dropout,
            target_modules: target_modules.into_iter().map(Into::into).collect(),
            bias:           default_bias(),
            inference_mode: false,
        }
    }

    /// Rank 64, alpha 128, dropout 0.05 on every attention and dense projection.
    pub fn default_preset() -> Self {
        let rank = 64;
        Self::new(rank, (rank * 2) as f64, 0.05, ["value", "query", "key", "dense"])
    }

    pub fn scaling(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }

    pub fn targets(&self, module: &str) -> bool {
        self.target_modules.iter().any(|m| m == module)
    }
}

/// `adapter_config.json` written next to every saved adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeftAdapterConfig {
    pub peft_type:      String,
    pub r:              usize,
    pub lora_alpha:     f64,
    pub lora_dropout:   f64,
    pub target_modules: Vec<String>,
    pub bias:           String,
    pub inference_mode: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_model_name_or_path: Option<String>,

    /// Encoder paths of the adapted layers, in record order
    pub adapted_layers: Vec<String>,
}

impl PeftAdapterConfig {
    pub fn new(cfg: &LoraConfig, base_model: Option<&str>, adapted_layers: Vec<String>) -> Self {
        let mut target_modules = cfg.target_modules.clone();
        target_modules.sort();
        Self {
            peft_type:      "LORA".to_string(),
            r:              cfg.r,
            lora_alpha:     cfg.lora_alpha,
            lora_dropout:   cfg.lora_dropout,
            target_modules,
            bias:           cfg.bias.clone(),
            inference_mode: cfg.inference_mode,
            base_model_name_or_path: base_model.map(String::from),
            adapted_layers,
        }
    }
}

// ─── LoraAdapter ──────────────────────────────────────────────────────────────
/// The trainable half of an adapted layer.
#[derive(Module, Debug)]
pub struct LoraAdapter<B: Backend> {
    pub lora_a:  Linear<B>,
    pub lora_b:  Linear<B>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraAdapter<B> {
    pub fn new(d_in: usize, d_out: usize, cfg: &LoraConfig, device: &B::Device) -> Self {
        let lora_a = LinearConfig::new(d_in, cfg.r)
            .with_bias(false)
            .init(device);
        let lora_b = LinearConfig::new(cfg.r, d_out)
            .with_bias(false)
            .with_initializer(Initializer::Zeros)
            .init(device);
        let dropout = DropoutConfig::new(cfg.lora_dropout).init();
        Self { lora_a, lora_b, dropout, scaling: cfg.scaling() }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.dropout.forward(x);
        self.lora_b
            .forward(self.lora_a.forward(x))
            .mul_scalar(self.scaling)
    }

    /// Sum of squares over A and B
    pub fn param_sq_norm(&self) -> f64 {
        let a = self.lora_a.weight.val().powf_scalar(2.0).sum();
        let b = self.lora_b.weight.val().powf_scalar(2.0).sum();
        (a + b).into_scalar().elem::<f64>()
    }
}

impl<B: AutodiffBackend> LoraAdapter<B> {
    /// Sum of squares of the gradients recorded for A and B
    pub fn grad_sq_norm(&self, grads: &GradientsParams) -> f64 {
        let ids = [self.lora_a.weight.id.clone(), self.lora_b.weight.id.clone()];
        ids.into_iter()
            .filter_map(|id| grads.get::<B::InnerBackend, 2>(id))
            .map(|g| g.powf_scalar(2.0).sum().into_scalar().elem::<f64>())
            .sum()
    }
}

// ─── LoraLinear ───────────────────────────────────────────────────────────────
/// A linear slot that may carry an adapter.
#[derive(Module, Debug)]
pub struct LoraLinear<B: Backend> {
    pub base:    Linear<B>,
    pub adapter: Option<LoraAdapter<B>>,
}

impl<B: Backend> LoraLinear<B> {
    /// A plain linear slot with no adapter yet.
    pub fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            base:    LinearConfig::new(d_in, d_out).init(device),
            adapter: None,
        }
    }

    /// Attach an adapter if `cfg` targets the slot `name`.
    ///
    /// Sizes are read from the base weight, so this works on a slot
    /// whose base weights were just loaded from a record.
    pub fn attach(mut self, name: &str, cfg: &LoraConfig, device: &B::Device) -> Self {
        if cfg.targets(name) {
            let [d_in, d_out] = self.base.weight.val().dims();
            self.adapter = Some(LoraAdapter::new(d_in, d_out, cfg, device));
        }
        self
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match &self.adapter {
            Some(adapter) => self.base.forward(x.clone()) + adapter.forward(x),
            None          => self.base.forward(x),
        }
    }

    /// Stop gradients from reaching the base weight and bias.
    pub fn freeze_base(mut self) -> Self {
        self.base = self.base.no_grad();
        self
    }
}

// ─── AdapterStack ─────────────────────────────────────────────────────────────
/// Every adapter of a model, detached from the base weights.
/// This is the unit that gets recorded to disk.
#[derive(Module, Debug)]
pub struct AdapterStack<B: Backend> {
    pub adapters: Vec<LoraAdapter<B>>,
}
