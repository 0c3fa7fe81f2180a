// ============================================================
// Layer 3 - Run State
// ============================================================
// Counters carried through the training loop:
//
//   steps            - global step count, never reset
//   epoch_steps      - steps taken in the current epoch
//   accumulated_loss - sum of step losses, reset every epoch
//   accuracy         - last evaluation accuracy, stale between evaluations
//
// Evaluation and checkpointing share one trigger rule: fire on
// every `interval`-th global step, and always on the last step of
// an epoch, so each epoch gets at least one of each.

use serde::Serialize;

/// Periodic-or-end-of-epoch trigger.
///
/// Fires when `global_step` is a multiple of `interval`, or when
/// `epoch_step` is the final step of an epoch of `epoch_len` steps.
/// An `interval` of zero disables the periodic half.
pub fn should_fire(global_step: usize, epoch_step: usize, epoch_len: usize, interval: usize) -> bool {
    let periodic = interval > 0 && global_step % interval == 0;
    let epoch_end = epoch_len > 0 && epoch_step == epoch_len;
    periodic || epoch_end
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunState {
    pub steps:            usize,
    pub epoch:            usize,
    pub epoch_steps:      usize,
    pub epoch_len:        usize,
    pub accumulated_loss: f64,
    pub accuracy:         f64,
    pub evaluations:      usize,
    pub checkpoints:      usize,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-epoch counters. `epoch` is zero-based.
    pub fn begin_epoch(&mut self, epoch: usize, epoch_len: usize) {
        self.epoch            = epoch;
        self.epoch_len        = epoch_len;
        self.epoch_steps      = 0;
        self.accumulated_loss = 0.0;
    }

    pub fn record_step(&mut self, loss: f64) {
        self.steps            += 1;
        self.epoch_steps      += 1;
        self.accumulated_loss += loss;
    }

    /// Mean loss over the steps taken so far this epoch
    pub fn average_loss(&self) -> f64 {
        if self.epoch_steps == 0 {
            0.0
        } else {
            self.accumulated_loss / self.epoch_steps as f64
        }
    }

    pub fn is_epoch_end(&self) -> bool {
        self.epoch_len > 0 && self.epoch_steps == self.epoch_len
    }

    pub fn due(&self, interval: usize) -> bool {
        should_fire(self.steps, self.epoch_steps, self.epoch_len, interval)
    }
}
