// ============================================================
// Layer 6 - Experiment Tracker
// ============================================================
// Records the run configuration once and metrics at every step
// into a local run directory:
//
//   {tracking_dir}/{project}/{run_id}/   (or {run_id}-N if taken)
//     config.json   ← configuration snapshot, written once
//     metrics.csv   ← one row per metric value
//
// Example CSV output:
//   step,metric,value
//   1,loss,0.982341
//   2,loss,0.951002
//   2,average_inner_distance,1.203311
//   2,average_across_distance,1.877410
//   2,accuracy,0.712500
//
// How to read the metrics:
//   - loss should trend down within and across epochs
//   - average_inner_distance should fall, average_across_distance rise
//   - accuracy is only written at evaluation steps
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::traits::ExperimentTracker;

/// `run-YYYYmmdd-HHMMSS-mmm`, local time
pub fn new_run_id() -> String {
    format!("run-{}", chrono::Local::now().format("%Y%m%d-%H%M%S-%3f"))
}

/// `parent/run_id`, or `parent/run_id-N` with the first free N.
fn unused_run_dir(parent: &Path, run_id: &str) -> PathBuf {
    let first = parent.join(run_id);
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| parent.join(format!("{run_id}-{n}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// File-backed tracker, one directory per run.
pub struct FileTracker {
    run_dir:  PathBuf,
    csv_path: PathBuf,
}

impl FileTracker {
    /// Create a fresh run directory and the CSV header. An existing
    /// run with the same id is never reused.
    pub fn new(tracking_dir: impl AsRef<Path>, project: &str, run_id: &str) -> Result<Self> {
        let run_dir = unused_run_dir(&tracking_dir.as_ref().join(project), run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Cannot create tracking directory '{}'", run_dir.display()))?;

        let csv_path = run_dir.join("metrics.csv");
        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        writeln!(f, "step,metric,value")?;

        tracing::info!("Tracking run in '{}'", run_dir.display());
        Ok(Self { run_dir, csv_path })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

impl ExperimentTracker for FileTracker {
    fn log_config(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        let path = self.run_dir.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(snapshot)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        Ok(())
    }

    fn log(&mut self, step: usize, metrics: &[(&str, f64)]) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        for (name, value) in metrics {
            writeln!(f, "{step},{name},{value:.6}")?;
        }
        Ok(())
    }
}

/// Keeps everything in memory; used by the driver tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTracker {
    pub config: Option<serde_json::Value>,
    pub rows:   Vec<(usize, String, f64)>,
}

#[cfg(test)]
impl MemoryTracker {
    /// Steps at which `metric` was logged
    pub fn steps_of(&self, metric: &str) -> Vec<usize> {
        self.rows
            .iter()
            .filter(|(_, name, _)| name == metric)
            .map(|(step, _, _)| *step)
            .collect()
    }
}

#[cfg(test)]
impl ExperimentTracker for MemoryTracker {
    fn log_config(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        self.config = Some(snapshot.clone());
        Ok(())
    }

    fn log(&mut self, step: usize, metrics: &[(&str, f64)]) -> Result<()> {
        self.rows
            .extend(metrics.iter().map(|(name, value)| (step, name.to_string(), *value)));
        Ok(())
    }
}
