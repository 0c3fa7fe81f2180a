// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust types and traits that describe a triplet
// fine-tuning run. Nothing in here touches Burn, the
// filesystem or the network, so every type can be unit
// tested without a device.
//
//   triplet.rs   - labelled sentences and (anchor, positive, negative) triplets
//   run_state.rs - step / epoch counters and the eval/checkpoint trigger
//   traits.rs    - the seams the training driver is written against

pub mod triplet;

pub mod run_state;

pub mod traits;
