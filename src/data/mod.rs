// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// This layer handles everything from a CSV file of labelled
// sentences to device-ready triplet batches.
//
// The pipeline flows in this order:
//
//   sentence,id CSV
//       │
//       ▼
//   loader            → reads rows, drops empty sentences
//       │
//       ▼
//   Preprocessor      → cleans text (whitespace, control chars)
//       │
//       ▼
//   SentenceTable     → rows grouped by id
//       │
//       ▼
//   TripletSampler    → (anchor, positive, negative) per epoch
//       │
//       ▼
//   TextBatcher       → tokenizes and pads into tensors
//       │
//       ▼
//   TripletLoader     → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Reads labelled sentence tables from CSV
pub mod loader;

/// Cleans and normalises raw sentences
pub mod preprocessor;

/// In-memory sentence table grouped by id
pub mod dataset;

/// Seeded per-epoch triplet sampling
pub mod triplet_sampler;

/// Tokenizes triplets into tensor batches
pub mod batcher;
