// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here.
//
//   lora.rs      - Low-rank adapters
//                  LoraLinear slots, adapter config, PEFT JSON
//
//   model.rs     - BERT-style sentence encoder
//                  Embeddings, self-attention, feed-forward,
//                  masked mean pooling
//
//   loss.rs      - Triplet margin loss
//
//   evaluator.rs - Embedding quality metrics
//                  Inner/across group distances, 1-NN accuracy
//
//   bert_weights.rs - Pretrained weights
//                  HuggingFace safetensors → encoder base
//
//   provider.rs  - Model loading
//                  Local dir or hub id → encoder + tokenizer,
//                  adapters injected, base frozen
//
//   trainable.rs - Burn-backed TripletModel
//                  Forward, loss, backward, AdamW step
//
//   trainer.rs   - The training loop
//                  Epochs, steps, eval and checkpoint triggers
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Devlin et al. (2019) BERT
//            Hu et al. (2021) LoRA

pub mod lora;

pub mod model;

pub mod bert_weights;

pub mod loss;

pub mod evaluator;

pub mod provider;

pub mod trainable;

pub mod trainer;

pub(crate) mod progress;
