// ============================================================
// Layer 5 - Sentence Encoder
// ============================================================
// BERT-style encoder that turns a batch of token sequences
// into one embedding per sequence:
//
//   word + position + token type embeddings → LayerNorm
//   N × [ self-attention (query, key, value, dense) → Add&Norm
//         dense → GELU → dense                      → Add&Norm ]
//   masked mean pooling over real tokens
//
// Every linear projection is a LoraLinear slot named after the
// BERT module it mirrors, so the adapter config can target
// "query", "key", "value" and "dense" by name.

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
    },
    prelude::*,
    tensor::activation::{gelu, softmax},
};
use serde::{Deserialize, Serialize};

use crate::ml::lora::{AdapterStack, LoraAdapter, LoraConfig, LoraLinear};

// ─── Architecture config ──────────────────────────────────────────────────────
/// Encoder hyperparameters, read from a BERT `config.json`.
/// Unknown keys in the file are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub vocab_size:              usize,
    pub hidden_size:             usize,
    pub num_hidden_layers:       usize,
    pub num_attention_heads:     usize,
    pub intermediate_size:       usize,
    pub max_position_embeddings: usize,

    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,

    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f64,

    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_type_vocab_size() -> usize { 2 }
fn default_dropout() -> f64 { 0.1 }
fn default_layer_norm_eps() -> f64 { 1e-12 }

impl EncoderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.hidden_size > 0, "hidden_size must be positive");
        anyhow::ensure!(
            self.num_attention_heads > 0 && self.hidden_size % self.num_attention_heads == 0,
            "hidden_size ({}) must be divisible by num_attention_heads ({})",
            self.hidden_size, self.num_attention_heads,
        );
        anyhow::ensure!(self.max_position_embeddings > 0, "max_position_embeddings must be positive");
        anyhow::ensure!(self.type_vocab_size > 0, "type_vocab_size must be positive");
        Ok(())
    }

    /// Build an encoder with randomly initialised base weights and no adapters.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SentenceEncoder<B> {
        let embeddings = Embeddings {
            word:     EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            position: EmbeddingConfig::new(self.max_position_embeddings, self.hidden_size).init(device),
            token_type: EmbeddingConfig::new(self.type_vocab_size, self.hidden_size).init(device),
            norm:     self.layer_norm(device),
            dropout:  DropoutConfig::new(self.hidden_dropout_prob).init(),
        };
        let layers = (0..self.num_hidden_layers)
            .map(|_| self.build_layer(device))
            .collect();
        SentenceEncoder {
            embeddings,
            layers,
            max_position_embeddings: self.max_position_embeddings,
        }
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.hidden_size)
            .with_epsilon(self.layer_norm_eps)
            .init(device)
    }

    fn build_layer<B: Backend>(&self, device: &B::Device) -> EncoderLayer<B> {
        let d = self.hidden_size;
        let attention = SelfAttention {
            query:     LoraLinear::new(d, d, device),
            key:       LoraLinear::new(d, d, device),
            value:     LoraLinear::new(d, d, device),
            dense:     LoraLinear::new(d, d, device),
            norm:      self.layer_norm(device),
            dropout:   DropoutConfig::new(self.hidden_dropout_prob).init(),
            num_heads: self.num_attention_heads,
        };
        EncoderLayer {
            attention,
            intermediate: LoraLinear::new(d, self.intermediate_size, device),
            output:       LoraLinear::new(self.intermediate_size, d, device),
            output_norm:  self.layer_norm(device),
            dropout:      DropoutConfig::new(self.hidden_dropout_prob).init(),
        }
    }
}

// ─── Modules ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Embeddings<B: Backend> {
    pub word:     Embedding<B>,
    pub position: Embedding<B>,
    /// Single-segment input: every token uses type 0
    pub token_type: Embedding<B>,
    pub norm:     LayerNorm<B>,
    pub dropout:  Dropout,
}

#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    pub query:     LoraLinear<B>,
    pub key:       LoraLinear<B>,
    pub value:     LoraLinear<B>,
    pub dense:     LoraLinear<B>,
    pub norm:      LayerNorm<B>,
    pub dropout:   Dropout,
    pub num_heads: usize,
}

impl<B: Backend> SelfAttention<B> {
    /// x: [batch, seq, hidden], pad_mask: [batch, seq] (true = padding)
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let [batch, seq, hidden] = x.dims();
        let heads    = self.num_heads;
        let head_dim = hidden / heads;

        let split = |t: Tensor<B, 3>| t.reshape([batch, seq, heads, head_dim]).swap_dims(1, 2);
        let q = split(self.query.forward(x.clone()));
        let k = split(self.key.forward(x.clone()));
        let v = split(self.value.forward(x.clone()));

        // [batch, heads, seq, seq]
        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((head_dim as f64).sqrt());
        let mask = pad_mask
            .reshape([batch, 1, 1, seq])
            .expand([batch, heads, seq, seq]);
        let weights = self.dropout.forward(softmax(scores.mask_fill(mask, -1.0e4), 3));

        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq, hidden]);
        let out = self.dropout.forward(self.dense.forward(context));
        self.norm.forward(out + x)
    }

    fn freeze_base(mut self) -> Self {
        self.query = self.query.freeze_base();
        self.key   = self.key.freeze_base();
        self.value = self.value.freeze_base();
        self.dense = self.dense.freeze_base();
        self.norm  = self.norm.no_grad();
        self
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub attention:    SelfAttention<B>,
    pub intermediate: LoraLinear<B>,
    pub output:       LoraLinear<B>,
    pub output_norm:  LayerNorm<B>,
    pub dropout:      Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let x   = self.attention.forward(x, pad_mask);
        let ffn = self.output.forward(gelu(self.intermediate.forward(x.clone())));
        self.output_norm.forward(x + self.dropout.forward(ffn))
    }

    fn freeze_base(mut self) -> Self {
        self.attention    = self.attention.freeze_base();
        self.intermediate = self.intermediate.freeze_base();
        self.output       = self.output.freeze_base();
        self.output_norm  = self.output_norm.no_grad();
        self
    }

    fn attach(mut self, cfg: &LoraConfig, device: &B::Device) -> Self {
        let a = self.attention;
        self.attention = SelfAttention {
            query: a.query.attach("query", cfg, device),
            key:   a.key.attach("key", cfg, device),
            value: a.value.attach("value", cfg, device),
            dense: a.dense.attach("dense", cfg, device),
            ..a
        };
        self.intermediate = self.intermediate.attach("dense", cfg, device);
        self.output       = self.output.attach("dense", cfg, device);
        self
    }

    /// (path suffix, slot) for every linear slot, in a fixed order
    fn slots(&self) -> [(&'static str, &LoraLinear<B>); 6] {
        [
            ("attention.query",    &self.attention.query),
            ("attention.key",      &self.attention.key),
            ("attention.value",    &self.attention.value),
            ("attention.dense",    &self.attention.dense),
            ("intermediate.dense", &self.intermediate),
            ("output.dense",       &self.output),
        ]
    }
}

#[derive(Module, Debug)]
pub struct SentenceEncoder<B: Backend> {
    pub embeddings:              Embeddings<B>,
    pub layers:                  Vec<EncoderLayer<B>>,
    pub max_position_embeddings: usize,
}

impl<B: Backend> SentenceEncoder<B> {
    /// input_ids, attention_mask: [batch, seq] → embeddings: [batch, hidden]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [batch, seq] = input_ids.dims();
        let device = input_ids.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &device)
            .unsqueeze::<2>()
            .expand([batch, seq]);
        let segments  = Tensor::<B, 2, Int>::zeros([batch, seq], &device);
        let x = self.embeddings.word.forward(input_ids)
            + self.embeddings.position.forward(positions)
            + self.embeddings.token_type.forward(segments);
        let mut x = self.embeddings.dropout.forward(self.embeddings.norm.forward(x));

        let pad_mask = attention_mask.clone().equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }

        mean_pool(x, attention_mask)
    }

    /// Inject adapters into every targeted slot.
    pub fn with_adapters(mut self, cfg: &LoraConfig, device: &B::Device) -> Self {
        self.layers = self.layers
            .into_iter()
            .map(|layer| layer.attach(cfg, device))
            .collect();
        self
    }

    /// Freeze everything except adapter parameters.
    pub fn freeze_base(mut self) -> Self {
        self.embeddings = self.embeddings.no_grad();
        self.layers = self.layers
            .into_iter()
            .map(EncoderLayer::freeze_base)
            .collect();
        self
    }

    /// Adapters paired with their encoder path, in record order.
    pub fn adapters(&self) -> Vec<(String, &LoraAdapter<B>)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer.slots()
                    .into_iter()
                    .filter_map(move |(name, slot)| {
                        slot.adapter.as_ref().map(|a| (format!("layers.{i}.{name}"), a))
                    })
            })
            .collect()
    }

    /// Copy of the adapter sub-module, ready to be recorded.
    pub fn adapter_stack(&self) -> AdapterStack<B> {
        AdapterStack {
            adapters: self.adapters().into_iter().map(|(_, a)| a.clone()).collect(),
        }
    }
}

/// Average token vectors, ignoring padding.
/// x: [batch, seq, hidden], mask: [batch, seq] → [batch, hidden]
fn mean_pool<B: Backend>(x: Tensor<B, 3>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
    let [batch, seq, hidden] = x.dims();
    let mask = attention_mask.float().reshape([batch, seq, 1]);
    let summed = (x * mask.clone()).sum_dim(1).reshape([batch, hidden]);
    let counts = mask.sum_dim(1).reshape([batch, 1]).clamp_min(1e-9);
    summed / counts
}
