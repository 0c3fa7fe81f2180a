// ============================================================
// Layer 6 - Adapter Registry
// ============================================================
// Where saved adapters get published after each checkpoint:
//
//   HubRegistry      - HuggingFace Hub repository `{user}/{name}`
//   LocalRegistry    - `{registry_dir}/{name}/`, overwritten each push
//   DisabledRegistry - nothing leaves the checkpoint directory
//
// Every push re-uploads the whole checkpoint directory, so the
// registry always holds the most recent adapter under one name.
// A failed push aborts the run.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::traits::AdapterRegistry;

const HF_API_BASE: &str = "https://huggingface.co/api";

/// HF token from `HF_TOKEN`, then `~/.huggingface/token`.
pub fn resolve_token() -> Option<String> {
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.is_empty() {
            return Some(token);
        }
    }

    let home = dirs::home_dir()?;
    let token = fs::read_to_string(home.join(".huggingface").join("token")).ok()?;
    let token = token.trim().to_string();
    (!token.is_empty()).then_some(token)
}

/// Regular files directly inside `dir`, sorted by name.
fn checkpoint_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read '{}'", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("'{}' has no UTF-8 file name", path.display()))
}

// ─── HubRegistry ──────────────────────────────────────────────────────────────
pub struct HubRegistry {
    client:    reqwest::blocking::Client,
    token:     String,
    namespace: String,
}

impl HubRegistry {
    /// Resolve the token and the account it belongs to. Fails
    /// before any training happens if either is missing.
    pub fn connect() -> Result<Self> {
        let Some(token) = resolve_token() else {
            bail!(
                "push_to_hub is enabled but no HuggingFace token was found; \
                 set HF_TOKEN, or disable uploads with push_to_hub=false"
            );
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("triplet-lora/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(format!("{HF_API_BASE}/whoami-v2"))
            .bearer_auth(&token)
            .send()
            .context("whoami request failed")?;
        if !response.status().is_success() {
            bail!("HuggingFace rejected the token: HTTP {}", response.status());
        }

        let whoami: serde_json::Value = response.json().context("Malformed whoami response")?;
        let namespace = whoami["name"]
            .as_str()
            .context("whoami response has no account name")?
            .to_string();

        tracing::info!("Adapters will be pushed to the hub as '{namespace}'");
        Ok(Self { client, token, namespace })
    }

    pub fn repo_id(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    /// Create the model repository; an existing one (409) is fine.
    fn create_repo(&self, name: &str) -> Result<()> {
        let body = serde_json::json!({
            "name":    name,
            "type":    "model",
            "private": false,
        });
        let response = self
            .client
            .post(format!("{HF_API_BASE}/repos/create"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .context("Create repo request failed")?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            bail!("Cannot create repo '{}': HTTP {status}: {body}", self.repo_id(name))
        }
    }

    fn upload_file(&self, repo_id: &str, local: &Path, path_in_repo: &str) -> Result<()> {
        let content = fs::read(local).with_context(|| format!("Cannot read '{}'", local.display()))?;
        let response = self
            .client
            .put(format!("{HF_API_BASE}/models/{repo_id}/upload/main/{path_in_repo}"))
            .bearer_auth(&self.token)
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .with_context(|| format!("Upload of '{path_in_repo}' failed"))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            bail!("Upload of '{path_in_repo}' to '{repo_id}' failed: HTTP {status}: {body}")
        }
    }
}

impl AdapterRegistry for HubRegistry {
    fn push(&self, local_dir: &Path, name: &str) -> Result<String> {
        let repo_id = self.repo_id(name);
        self.create_repo(name)?;

        for file in checkpoint_files(local_dir)? {
            self.upload_file(&repo_id, &file, file_name(&file)?)?;
        }

        let url = format!("https://huggingface.co/{repo_id}");
        tracing::info!("Pushed '{}' to {url}", local_dir.display());
        Ok(url)
    }
}

// ─── LocalRegistry ────────────────────────────────────────────────────────────
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Cannot create registry directory '{}'", root.display()))?;
        Ok(Self { root })
    }
}

impl AdapterRegistry for LocalRegistry {
    fn push(&self, local_dir: &Path, name: &str) -> Result<String> {
        let dest = self.root.join(name);
        fs::create_dir_all(&dest)
            .with_context(|| format!("Cannot create '{}'", dest.display()))?;

        for file in checkpoint_files(local_dir)? {
            let target = dest.join(file_name(&file)?);
            fs::copy(&file, &target)
                .with_context(|| format!("Cannot copy '{}' to '{}'", file.display(), target.display()))?;
        }

        tracing::info!("Pushed '{}' to '{}'", local_dir.display(), dest.display());
        Ok(dest.display().to_string())
    }
}

// ─── DisabledRegistry ─────────────────────────────────────────────────────────
pub struct DisabledRegistry;

impl AdapterRegistry for DisabledRegistry {
    fn push(&self, local_dir: &Path, name: &str) -> Result<String> {
        tracing::debug!("Upload disabled, '{}' stays local (would be '{name}')", local_dir.display());
        Ok(local_dir.display().to_string())
    }
}

/// Registry chosen by configuration: `push_to_hub = false` disables
/// uploads, a `registry_dir` mirrors locally, otherwise the hub.
pub enum Registry {
    Hub(HubRegistry),
    Local(LocalRegistry),
    Disabled(DisabledRegistry),
}

impl Registry {
    pub fn select(push_to_hub: bool, registry_dir: Option<&str>) -> Result<Self> {
        Ok(match (push_to_hub, registry_dir) {
            (false, _)        => Registry::Disabled(DisabledRegistry),
            (true, Some(dir)) => Registry::Local(LocalRegistry::new(dir)?),
            (true, None)      => Registry::Hub(HubRegistry::connect()?),
        })
    }
}

impl AdapterRegistry for Registry {
    fn push(&self, local_dir: &Path, name: &str) -> Result<String> {
        match self {
            Registry::Hub(r)      => r.push(local_dir, name),
            Registry::Local(r)    => r.push(local_dir, name),
            Registry::Disabled(r) => r.push(local_dir, name),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(dir: &Path) -> PathBuf {
        let ckpt = dir.join("lora_m_5");
        fs::create_dir_all(ckpt.join("nested")).unwrap();
        fs::write(ckpt.join("adapter_config.json"), "{\"r\": 4}").unwrap();
        fs::write(ckpt.join("adapter_model.mpk"), [1u8, 2, 3]).unwrap();
        ckpt
    }

    #[test]
    fn test_checkpoint_files_skips_directories() {
        let dir   = tempfile::tempdir().unwrap();
        let ckpt  = checkpoint(dir.path());
        let names: Vec<String> = checkpoint_files(&ckpt)
            .unwrap()
            .iter()
            .map(|p| file_name(p).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["adapter_config.json", "adapter_model.mpk"]);
    }

    #[test]
    fn test_local_registry_overwrites_previous_push() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = checkpoint(dir.path());
        let reg  = Registry::select(true, Some(dir.path().join("hub").to_str().unwrap())).unwrap();

        let loc = reg.push(&ckpt, "LoRa_m").unwrap();
        assert!(loc.ends_with("LoRa_m"));

        fs::write(ckpt.join("adapter_config.json"), "{\"r\": 8}").unwrap();
        reg.push(&ckpt, "LoRa_m").unwrap();

        let pushed = fs::read_to_string(dir.path().join("hub/LoRa_m/adapter_config.json")).unwrap();
        assert_eq!(pushed, "{\"r\": 8}");
        assert!(dir.path().join("hub/LoRa_m/adapter_model.mpk").exists());
    }

    #[test]
    fn test_disabled_registry_wins_over_registry_dir() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = checkpoint(dir.path());
        let reg  = Registry::select(false, Some(dir.path().join("hub").to_str().unwrap())).unwrap();
        assert!(matches!(reg, Registry::Disabled(_)));

        reg.push(&ckpt, "LoRa_m").unwrap();
        assert!(!dir.path().join("hub").exists());
    }
}
