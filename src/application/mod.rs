// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to run a
// fine-tuning job.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only configuration and workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Option resolution, defaults and validation
pub mod config;

// The fine-tuning workflow
pub mod train_use_case;
