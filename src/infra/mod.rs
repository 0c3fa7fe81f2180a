// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong to any one layer:
//
//   checkpoint.rs      - Adapter checkpoint paths
//                        Derives lora_{name}_{step} directories
//                        under save_model_path and tracks the
//                        latest step written.
//
//   registry.rs        - Adapter publishing
//                        HuggingFace Hub upload, a local mirror
//                        directory, or nothing at all.
//
//   tokenizer_store.rs - Tokenizer loading
//                        Loads tokenizer.json with truncation set,
//                        or builds a word-level one from the corpus.
//
//   tracker.rs         - Experiment tracking
//                        Per-run config snapshot and a step/metric
//                        CSV under the tracking directory.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Adapter checkpoint directories
pub mod checkpoint;

/// Hub / local / disabled adapter registries
pub mod registry;

/// Tokenizer loading and corpus fallback
pub mod tokenizer_store;

/// Run configuration and metric logging
pub mod tracker;
