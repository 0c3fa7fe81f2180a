// ============================================================
// Layer 2 - Training Configuration
// ============================================================
// Two stages:
//
//   TrainOptions - what the caller supplied; every key optional.
//                  Read from JSON and/or CLI flags. Keys we don't
//                  recognise are kept aside and reported, never used.
//
//   TrainConfig  - every key resolved: caller value, else default,
//                  else derived from other keys:
//                    model_save_name    ← last segment of model_path
//                    wandb_project_name ← {model_save_name}-tracking
//                    eval_data_path     ← data_path
//                    triplet_loss       ← margin 1.0, p 2
//
// validate() turns settings that would fail mid-run into a typed
// ConfigError before anything is loaded.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::ml::lora::{LoraConfig, ADAPTABLE_MODULES};
use crate::ml::loss::TripletLossConfig;

pub const DEFAULT_MODEL_PATH:      &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_DATA_PATH:       &str = "./dataset/data.csv";
pub const DEFAULT_DEVICE:          &str = "cuda";
pub const DEFAULT_SAVE_MODEL_PATH: &str = "./models/LoRa";
pub const DEFAULT_TRACKING_DIR:    &str = "./runs";

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("peft_config is required: the adapter rank, alpha, dropout and target modules must be set")]
    MissingPeftConfig,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("lr must be positive, got {0}")]
    InvalidLearningRate(f64),

    #[error("invalid peft_config: {0}")]
    InvalidLora(String),

    #[error("invalid triplet_loss: {0}")]
    InvalidLoss(String),

    #[error("unknown device '{0}' (expected cpu, cuda, cuda:N, gpu or wgpu)")]
    UnknownDevice(String),
}

// ─── Device ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    /// NdArray backend
    Cpu,
    /// WGPU backend on discrete GPU N
    Gpu(usize),
}

impl FromStr for DeviceSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let unknown = || ConfigError::UnknownDevice(s.to_string());

        let (kind, index) = match lower.split_once(':') {
            Some((kind, index)) => (kind, Some(index.parse::<usize>().map_err(|_| unknown())?)),
            None => (lower.as_str(), None),
        };

        match (kind, index) {
            ("cpu", None)                   => Ok(DeviceSpec::Cpu),
            ("cuda" | "gpu" | "wgpu", i)    => Ok(DeviceSpec::Gpu(i.unwrap_or(0))),
            _                               => Err(unknown()),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu    => write!(f, "cpu"),
            DeviceSpec::Gpu(i) => write!(f, "gpu:{i}"),
        }
    }
}

// ─── TrainOptions ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub model_path:         Option<String>,
    pub data_path:          Option<String>,
    pub device:             Option<String>,
    pub peft_config:        Option<LoraConfig>,
    pub batch_size:         Option<usize>,
    pub lr:                 Option<f64>,
    pub triplet_loss:       Option<TripletLossConfig>,
    pub num_epochs:         Option<usize>,
    pub max_len:            Option<usize>,
    pub eval_every:         Option<usize>,
    pub save_model_every:   Option<usize>,
    pub shuffle:            Option<bool>,
    pub eval_data_path:     Option<String>,
    pub save_model_path:    Option<String>,
    pub model_save_name:    Option<String>,
    pub wandb_project_name: Option<String>,

    pub seed:         Option<u64>,
    pub tracking_dir: Option<String>,
    pub watch_every:  Option<usize>,
    pub push_to_hub:  Option<bool>,
    pub registry_dir: Option<String>,

    /// Anything else found in the input
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

impl TrainOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Cannot parse config file '{}'", path.display()))
    }

    /// Values set in `overrides` win over values in `self`.
    pub fn merge(self, overrides: TrainOptions) -> TrainOptions {
        let mut unrecognized = self.unrecognized;
        unrecognized.extend(overrides.unrecognized);

        TrainOptions {
            model_path:         overrides.model_path.or(self.model_path),
            data_path:          overrides.data_path.or(self.data_path),
            device:             overrides.device.or(self.device),
            peft_config:        overrides.peft_config.or(self.peft_config),
            batch_size:         overrides.batch_size.or(self.batch_size),
            lr:                 overrides.lr.or(self.lr),
            triplet_loss:       overrides.triplet_loss.or(self.triplet_loss),
            num_epochs:         overrides.num_epochs.or(self.num_epochs),
            max_len:            overrides.max_len.or(self.max_len),
            eval_every:         overrides.eval_every.or(self.eval_every),
            save_model_every:   overrides.save_model_every.or(self.save_model_every),
            shuffle:            overrides.shuffle.or(self.shuffle),
            eval_data_path:     overrides.eval_data_path.or(self.eval_data_path),
            save_model_path:    overrides.save_model_path.or(self.save_model_path),
            model_save_name:    overrides.model_save_name.or(self.model_save_name),
            wandb_project_name: overrides.wandb_project_name.or(self.wandb_project_name),
            seed:               overrides.seed.or(self.seed),
            tracking_dir:       overrides.tracking_dir.or(self.tracking_dir),
            watch_every:        overrides.watch_every.or(self.watch_every),
            push_to_hub:        overrides.push_to_hub.or(self.push_to_hub),
            registry_dir:       overrides.registry_dir.or(self.registry_dir),
            unrecognized,
        }
    }
}

// ─── TrainConfig ──────────────────────────────────────────────────────────────
/// Fully resolved run configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainConfig {
    pub model_path:         String,
    pub data_path:          String,
    pub device:             String,
    pub peft_config:        Option<LoraConfig>,
    pub batch_size:         usize,
    pub lr:                 f64,
    pub triplet_loss:       TripletLossConfig,
    pub num_epochs:         usize,
    pub max_len:            usize,
    pub eval_every:         usize,
    pub save_model_every:   usize,
    pub shuffle:            bool,
    pub eval_data_path:     String,
    pub save_model_path:    String,
    pub model_save_name:    String,
    pub wandb_project_name: String,

    pub seed:         u64,
    pub tracking_dir: String,
    pub watch_every:  usize,
    pub push_to_hub:  bool,
    pub registry_dir: Option<String>,

    #[serde(skip)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

/// Last non-empty path segment, e.g. "org/all-MiniLM-L6-v2/" → "all-MiniLM-L6-v2"
pub fn derive_save_name(model_path: &str) -> String {
    model_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("model")
        .to_string()
}

impl TrainConfig {
    pub fn resolve(opts: TrainOptions) -> Self {
        let model_path      = opts.model_path.unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string());
        let data_path       = opts.data_path.unwrap_or_else(|| DEFAULT_DATA_PATH.to_string());
        let model_save_name = opts.model_save_name.unwrap_or_else(|| derive_save_name(&model_path));

        Self {
            device:             opts.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            peft_config:        opts.peft_config,
            batch_size:         opts.batch_size.unwrap_or(16),
            lr:                 opts.lr.unwrap_or(1e-5),
            triplet_loss:       opts.triplet_loss.unwrap_or_default(),
            num_epochs:         opts.num_epochs.unwrap_or(10),
            max_len:            opts.max_len.unwrap_or(200),
            eval_every:         opts.eval_every.unwrap_or(150),
            save_model_every:   opts.save_model_every.unwrap_or(500),
            shuffle:            opts.shuffle.unwrap_or(true),
            eval_data_path:     opts.eval_data_path.unwrap_or_else(|| data_path.clone()),
            save_model_path:    opts.save_model_path.unwrap_or_else(|| DEFAULT_SAVE_MODEL_PATH.to_string()),
            wandb_project_name: opts.wandb_project_name.unwrap_or_else(|| format!("{model_save_name}-tracking")),
            seed:               opts.seed.unwrap_or(42),
            tracking_dir:       opts.tracking_dir.unwrap_or_else(|| DEFAULT_TRACKING_DIR.to_string()),
            watch_every:        opts.watch_every.unwrap_or(1000),
            push_to_hub:        opts.push_to_hub.unwrap_or(true),
            registry_dir:       opts.registry_dir,
            unrecognized:       opts.unrecognized,
            model_path,
            data_path,
            model_save_name,
        }
    }

    /// The adapter configuration, which has no default.
    pub fn peft(&self) -> Result<&LoraConfig, ConfigError> {
        self.peft_config.as_ref().ok_or(ConfigError::MissingPeftConfig)
    }

    pub fn device_spec(&self) -> Result<DeviceSpec, ConfigError> {
        self.device.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lora = self.peft()?;
        if lora.r == 0 {
            return Err(ConfigError::InvalidLora("r must be greater than zero".into()));
        }
        if !(0.0..1.0).contains(&lora.lora_dropout) {
            return Err(ConfigError::InvalidLora(format!(
                "lora_dropout must be in [0, 1), got {}", lora.lora_dropout
            )));
        }
        if lora.target_modules.is_empty() {
            return Err(ConfigError::InvalidLora("target_modules is empty".into()));
        }
        if let Some(unknown) = lora.target_modules.iter().find(|m| !ADAPTABLE_MODULES.contains(&m.as_str())) {
            return Err(ConfigError::InvalidLora(format!(
                "unknown target module '{unknown}', expected one of {ADAPTABLE_MODULES:?}"
            )));
        }

        for (name, value) in [
            ("batch_size",       self.batch_size),
            ("num_epochs",       self.num_epochs),
            ("max_len",          self.max_len),
            ("eval_every",       self.eval_every),
            ("save_model_every", self.save_model_every),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.lr.is_nan() || self.lr <= 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.lr));
        }
        if self.triplet_loss.p.is_nan() || self.triplet_loss.p <= 0.0 {
            return Err(ConfigError::InvalidLoss(format!("p must be positive, got {}", self.triplet_loss.p)));
        }

        self.device_spec()?;
        Ok(())
    }

    /// (key, value) pairs in presentation order; unrecognized keys last.
    pub fn entries(&self) -> Vec<(String, String)> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "None".to_string());
        let peft = self.peft_config.as_ref().map_or_else(
            || "None".to_string(),
            |c| format!(
                "LoraConfig(r={}, lora_alpha={}, lora_dropout={}, target_modules={:?})",
                c.r, c.lora_alpha, c.lora_dropout, c.target_modules,
            ),
        );
        let loss = format!(
            "TripletMarginLoss(margin={}, p={})",
            self.triplet_loss.margin, self.triplet_loss.p,
        );

        let mut entries: Vec<(String, String)> = [
            ("model_path",         self.model_path.clone()),
            ("data_path",          self.data_path.clone()),
            ("device",             self.device.clone()),
            ("peft_config",        peft),
            ("batch_size",         self.batch_size.to_string()),
            ("lr",                 self.lr.to_string()),
            ("triplet_loss",       loss),
            ("num_epochs",         self.num_epochs.to_string()),
            ("max_len",            self.max_len.to_string()),
            ("eval_every",         self.eval_every.to_string()),
            ("save_model_every",   self.save_model_every.to_string()),
            ("shuffle",            self.shuffle.to_string()),
            ("eval_data_path",     self.eval_data_path.clone()),
            ("save_model_path",    self.save_model_path.clone()),
            ("model_save_name",    self.model_save_name.clone()),
            ("wandb_project_name", self.wandb_project_name.clone()),
            ("seed",               self.seed.to_string()),
            ("tracking_dir",       self.tracking_dir.clone()),
            ("watch_every",        self.watch_every.to_string()),
            ("push_to_hub",        self.push_to_hub.to_string()),
            ("registry_dir",       opt(&self.registry_dir)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        entries.extend(self.unrecognized.iter().map(|(k, v)| (k.clone(), v.to_string())));
        entries
    }

    /// One-time snapshot for the experiment tracker.
    pub fn tracking_snapshot(&self) -> Result<serde_json::Value, ConfigError> {
        let lora = self.peft()?;
        Ok(serde_json::json!({
            "model_path":          self.model_path,
            "data_path":           self.data_path,
            "device":              self.device,
            "LoRa_Rank":           lora.r,
            "LoRa_Alpha":          lora.lora_alpha,
            "LoRa_Dropout":        lora.lora_dropout,
            "LoRa_Target_Modules": lora.target_modules,
            "batch_size":          self.batch_size,
            "lr":                  self.lr,
            "triplet_loss":        self.triplet_loss,
            "num_epochs":          self.num_epochs,
            "max_len":             self.max_len,
            "eval_every":          self.eval_every,
            "save_model_every":    self.save_model_every,
            "shuffle":             self.shuffle,
            "eval_data_path":      self.eval_data_path,
            "save_model_path":     self.save_model_path,
            "model_save_name":     self.model_save_name,
            "wandb_project_name":  self.wandb_project_name,
            "seed":                self.seed,
        }))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn with_peft() -> TrainOptions {
        TrainOptions { peft_config: Some(LoraConfig::default_preset()), ..Default::default() }
    }

    #[test]
    fn test_defaults_fill_every_key() {
        let cfg = TrainConfig::resolve(TrainOptions::default());
        assert_eq!(cfg.model_path, DEFAULT_MODEL_PATH);
        assert_eq!(cfg.data_path, "./dataset/data.csv");
        assert_eq!(cfg.device, "cuda");
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.lr, 1e-5);
        assert_eq!(cfg.triplet_loss, TripletLossConfig { margin: 1.0, p: 2.0, eps: 1e-6 });
        assert_eq!(cfg.num_epochs, 10);
        assert_eq!(cfg.max_len, 200);
        assert_eq!(cfg.eval_every, 150);
        assert_eq!(cfg.save_model_every, 500);
        assert!(cfg.shuffle);
        assert_eq!(cfg.save_model_path, "./models/LoRa");

        let keys: Vec<String> = cfg.entries().into_iter().map(|(k, _)| k).collect();
        for key in [
            "model_path", "data_path", "device", "peft_config", "batch_size", "lr",
            "triplet_loss", "num_epochs", "max_len", "eval_every", "save_model_every",
            "shuffle", "eval_data_path", "save_model_path", "model_save_name",
            "wandb_project_name",
        ] {
            assert!(keys.iter().any(|k| k == key), "missing {key}");
        }
    }

    #[test]
    fn test_derived_defaults() {
        let cfg = TrainConfig::resolve(TrainOptions {
            model_path: Some("org/my-encoder".into()),
            data_path:  Some("train.csv".into()),
            ..Default::default()
        });
        assert_eq!(cfg.model_save_name, "my-encoder");
        assert_eq!(cfg.wandb_project_name, "my-encoder-tracking");
        assert_eq!(cfg.eval_data_path, "train.csv");
    }

    #[test]
    fn test_caller_values_take_precedence() {
        let cfg = TrainConfig::resolve(TrainOptions {
            model_save_name:    Some("custom".into()),
            wandb_project_name: Some("proj".into()),
            eval_data_path:     Some("eval.csv".into()),
            batch_size:         Some(4),
            shuffle:            Some(false),
            ..Default::default()
        });
        assert_eq!(cfg.model_save_name, "custom");
        assert_eq!(cfg.wandb_project_name, "proj");
        assert_eq!(cfg.eval_data_path, "eval.csv");
        assert_eq!(cfg.batch_size, 4);
        assert!(!cfg.shuffle);
    }

    #[test]
    fn test_save_name_ignores_trailing_slash() {
        assert_eq!(derive_save_name("models/base/"), "base");
        assert_eq!(derive_save_name("plain"), "plain");
        assert_eq!(derive_save_name("/"), "model");
    }

    #[test]
    fn test_missing_peft_config_is_a_validation_error() {
        let cfg = TrainConfig::resolve(TrainOptions::default());
        assert_eq!(cfg.validate(), Err(ConfigError::MissingPeftConfig));
        assert!(cfg.tracking_snapshot().is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let mut opts = with_peft();
        opts.eval_every = Some(0);
        assert_eq!(TrainConfig::resolve(opts).validate(), Err(ConfigError::Zero("eval_every")));
    }

    #[test]
    fn test_bad_lora_settings_are_rejected() {
        let mut opts = with_peft();
        opts.peft_config = Some(LoraConfig::new(8, 16.0, 0.1, ["query", "attention"]));
        assert!(matches!(TrainConfig::resolve(opts).validate(), Err(ConfigError::InvalidLora(_))));

        let mut opts = with_peft();
        opts.peft_config = Some(LoraConfig::new(8, 16.0, 1.0, ["query"]));
        assert!(matches!(TrainConfig::resolve(opts).validate(), Err(ConfigError::InvalidLora(_))));
    }

    #[test]
    fn test_non_positive_lr_is_rejected() {
        let mut opts = with_peft();
        opts.lr = Some(0.0);
        assert_eq!(TrainConfig::resolve(opts).validate(), Err(ConfigError::InvalidLearningRate(0.0)));
    }

    #[test]
    fn test_device_strings() {
        assert_eq!("cuda".parse::<DeviceSpec>(), Ok(DeviceSpec::Gpu(0)));
        assert_eq!("cuda:2".parse::<DeviceSpec>(), Ok(DeviceSpec::Gpu(2)));
        assert_eq!("WGPU".parse::<DeviceSpec>(), Ok(DeviceSpec::Gpu(0)));
        assert_eq!("cpu".parse::<DeviceSpec>(), Ok(DeviceSpec::Cpu));
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
        assert!("cpu:1".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_unrecognized_json_keys_are_kept_aside() {
        let json = r#"{
            "batch_size": 8,
            "peft_config": {"r": 4, "lora_alpha": 8, "lora_dropout": 0.0, "target_modules": ["query"]},
            "warmup_steps": 100
        }"#;
        let opts: TrainOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.batch_size, Some(8));
        assert_eq!(opts.peft_config.as_ref().unwrap().bias, "none");
        assert_eq!(opts.unrecognized.get("warmup_steps"), Some(&serde_json::json!(100)));

        let cfg = TrainConfig::resolve(opts);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.entries().last().unwrap().0, "warmup_steps");
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let file = TrainOptions { batch_size: Some(8), lr: Some(1e-3), ..Default::default() };
        let cli  = TrainOptions { batch_size: Some(32), ..Default::default() };
        let merged = file.merge(cli);
        assert_eq!(merged.batch_size, Some(32));
        assert_eq!(merged.lr, Some(1e-3));
    }

    #[test]
    fn test_tracking_snapshot_has_lora_fields() {
        let snap = TrainConfig::resolve(with_peft()).tracking_snapshot().unwrap();
        assert_eq!(snap["LoRa_Rank"], 64);
        assert_eq!(snap["LoRa_Alpha"], 128.0);
        assert_eq!(snap["wandb_project_name"], "all-MiniLM-L6-v2-tracking");
    }
}
