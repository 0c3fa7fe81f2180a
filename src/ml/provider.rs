// ============================================================
// Layer 5 - Model Provider
// ============================================================
// Turns a model identifier into a ready-to-train encoder:
//
//   Step 1: Resolve model files    (local directory or hub repo)
//   Step 2: Read config.json       (BERT schema)
//   Step 3: Load the tokenizer     (or build one from the corpus)
//   Step 4: Build the encoder      (base weights, see below)
//   Step 5: Inject LoRA adapters   (target_modules)
//   Step 6: Freeze base weights    (only adapters train)
//
// A model directory may carry:
//   config.json     - architecture hyperparameters
//   tokenizer.json  - HuggingFace tokenizer
//   model.mpk          - base weights as a Burn CompactRecorder record
//   model.safetensors  - HuggingFace BERT weights
//
// model.mpk wins when both are present. Hub repositories are
// asked for model.safetensors. With neither file the base
// starts from random weights.

use anyhow::{ensure, Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::infra::registry::resolve_token;
use crate::infra::tokenizer_store::{id_space, pad_id, TokenizerStore};
use crate::ml::bert_weights::load_safetensors;
use crate::ml::lora::LoraConfig;
use crate::ml::model::{EncoderConfig, SentenceEncoder};

const CONFIG_FILE:    &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
/// Stem passed to CompactRecorder, which appends `.mpk`
const RECORD_STEM:       &str = "model";
const RECORD_FILE:       &str = "model.mpk";
const SAFETENSORS_FILE:  &str = "model.safetensors";

/// Vocabulary used for a corpus-built tokenizer when no config says otherwise
const FALLBACK_VOCAB_SIZE: usize = 30522;

// ─── Model files ──────────────────────────────────────────────────────────────
/// Where the pretrained base weights come from.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseWeights {
    /// Burn record written by CompactRecorder
    Record(PathBuf),
    SafeTensors(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelFiles {
    pub config:        Option<PathBuf>,
    /// Directory holding tokenizer.json
    pub tokenizer_dir: Option<PathBuf>,
    pub weights:       Option<BaseWeights>,
}

impl ModelFiles {
    fn from_dir(dir: &Path) -> Self {
        let existing = |name: &str| Some(dir.join(name)).filter(|p| p.is_file());
        Self {
            config:        existing(CONFIG_FILE),
            tokenizer_dir: existing(TOKENIZER_FILE).map(|_| dir.to_path_buf()),
            weights:       existing(RECORD_FILE)
                .map(BaseWeights::Record)
                .or_else(|| existing(SAFETENSORS_FILE).map(BaseWeights::SafeTensors)),
        }
    }
}

/// Local directories are used as they are; anything else is
/// treated as a hub repository id and fetched into the hub cache.
pub fn resolve_model_files(model_path: &str) -> Result<ModelFiles> {
    let local = Path::new(model_path);
    if local.is_dir() {
        tracing::info!("Loading model from local directory '{model_path}'");
        return Ok(ModelFiles::from_dir(local));
    }

    ensure!(
        model_path.split('/').filter(|p| !p.is_empty()).count() == 2,
        "'{model_path}' is neither a local directory nor a hub id of the form 'org/name'",
    );

    tracing::info!("Fetching '{model_path}' from the HuggingFace Hub");
    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_token(resolve_token())
        .build()
        .context("Failed to initialise the HF API")?;
    let repo = api.model(model_path.trim_matches('/').to_string());

    let config = repo
        .get(CONFIG_FILE)
        .with_context(|| format!("Cannot fetch {CONFIG_FILE} for '{model_path}'"))?;

    let tokenizer_dir = match repo.get(TOKENIZER_FILE) {
        Ok(path) => path.parent().map(Path::to_path_buf),
        Err(e) => {
            tracing::warn!("No {TOKENIZER_FILE} for '{model_path}': {e}");
            None
        }
    };

    let weights = match repo.get(SAFETENSORS_FILE) {
        Ok(path) => Some(BaseWeights::SafeTensors(path)),
        Err(e) => {
            tracing::warn!("No {SAFETENSORS_FILE} for '{model_path}': {e}");
            None
        }
    };

    Ok(ModelFiles { config: Some(config), tokenizer_dir, weights })
}

/// MiniLM-L6 shape, used when a model directory has no config.json.
pub fn fallback_config(vocab_size: usize, max_len: usize) -> EncoderConfig {
    EncoderConfig {
        vocab_size,
        hidden_size:             384,
        num_hidden_layers:       6,
        num_attention_heads:     12,
        intermediate_size:       1536,
        max_position_embeddings: max_len.max(512),
        type_vocab_size:         2,
        hidden_dropout_prob:     0.1,
        layer_norm_eps:          1e-12,
    }
}

pub fn read_config(path: &Path) -> Result<EncoderConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    let cfg: EncoderConfig = serde_json::from_str(&json)
        .with_context(|| format!("'{}' is not a BERT config", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

// ─── get_model ────────────────────────────────────────────────────────────────
/// Everything `get_model` needs besides the device.
pub struct ModelRequest<'a> {
    pub model_path: &'a str,
    pub lora:       &'a LoraConfig,
    pub max_len:    usize,
    /// Sentences to build a tokenizer from if the model has none
    pub corpus:     &'a [String],
    /// Where a corpus-built tokenizer is saved
    pub tokenizer_fallback_dir: PathBuf,
}

pub struct LoadedModel<B: Backend> {
    pub encoder:   SentenceEncoder<B>,
    pub config:    EncoderConfig,
    pub tokenizer: Tokenizer,
    pub pad_id:    u32,
    /// `max_len` after clamping to the position table
    pub max_len:   usize,
}

pub fn get_model<B: Backend>(req: &ModelRequest, device: &B::Device) -> Result<LoadedModel<B>> {
    let files = resolve_model_files(req.model_path)?;
    load_from_files(&files, req, device)
}

pub fn load_from_files<B: Backend>(
    files:  &ModelFiles,
    req:    &ModelRequest,
    device: &B::Device,
) -> Result<LoadedModel<B>> {
    // ── config.json ───────────────────────────────────────────────────────────
    let declared = files.config.as_deref().map(read_config).transpose()?;

    let max_len = match &declared {
        Some(cfg) if req.max_len > cfg.max_position_embeddings => {
            tracing::warn!(
                "max_len {} exceeds the model's {} positions, truncating to {}",
                req.max_len, cfg.max_position_embeddings, cfg.max_position_embeddings,
            );
            cfg.max_position_embeddings
        }
        _ => req.max_len,
    };

    // ── Tokenizer ─────────────────────────────────────────────────────────────
    let tok_dir = files
        .tokenizer_dir
        .clone()
        .unwrap_or_else(|| req.tokenizer_fallback_dir.clone());
    let vocab_size = declared.as_ref().map_or(FALLBACK_VOCAB_SIZE, |c| c.vocab_size);
    let tokenizer  = TokenizerStore::new(tok_dir).load_or_build(req.corpus, vocab_size, max_len)?;

    let config = match declared {
        Some(cfg) => cfg,
        None => {
            tracing::warn!("No {CONFIG_FILE} found, using the default MiniLM-L6 architecture");
            fallback_config(id_space(&tokenizer), max_len)
        }
    };
    ensure!(
        id_space(&tokenizer) <= config.vocab_size,
        "tokenizer produces ids up to {} but the model has only {} embeddings",
        id_space(&tokenizer),
        config.vocab_size,
    );

    // ── Encoder ───────────────────────────────────────────────────────────────
    let mut encoder = config.init::<B>(device);
    match &files.weights {
        Some(BaseWeights::Record(path)) => {
            let record = CompactRecorder::new()
                .load(path.with_file_name(RECORD_STEM), device)
                .with_context(|| format!("Cannot load base weights from '{}'", path.display()))?;
            encoder = encoder.load_record(record);
            tracing::info!("Loaded base weights from '{}'", path.display());
        }
        Some(BaseWeights::SafeTensors(path)) => {
            encoder = load_safetensors(encoder, path, device)?;
            tracing::info!("Loaded pretrained weights from '{}'", path.display());
        }
        None => tracing::warn!(
            "No {RECORD_FILE} or {SAFETENSORS_FILE} found for '{}', base weights are randomly initialised",
            req.model_path,
        ),
    }

    let encoder = encoder.with_adapters(req.lora, device).freeze_base();
    tracing::info!(
        "Encoder ready: {} layers, hidden={}, {} LoRA adapters (r={})",
        config.num_hidden_layers,
        config.hidden_size,
        encoder.adapters().len(),
        req.lora.r,
    );

    Ok(LoadedModel {
        pad_id: pad_id(&tokenizer),
        encoder,
        config,
        tokenizer,
        max_len,
    })
}
