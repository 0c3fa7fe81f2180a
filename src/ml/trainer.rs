// ============================================================
// Layer 5 - Training Loop
// ============================================================
// Epoch / step loop for triplet fine-tuning.
//
//   for each epoch:
//     build a fresh triplet sampler (re-shuffles)
//     for each batch:
//       train step → log loss
//       every watch_every steps     → log adapter grad/param norms
//       eval trigger                → embed eval table, log metrics
//       checkpoint trigger          → save adapter, push to registry
//
// Both triggers fire on every N-th global step and on the last
// step of each epoch (see domain::run_state::should_fire).
//
// The loop only talks to the collaborator traits, so tests
// drive it with in-memory stand-ins.
//
// Reference: Burn Book §5 (Custom Training Loop)

use anyhow::{Context, Result};

use crate::domain::run_state::RunState;
use crate::domain::traits::{AdapterRegistry, ExperimentTracker, TripletModel, TripletSource};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{evaluator, progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub num_epochs:       usize,
    pub eval_every:       usize,
    pub save_model_every: usize,
    /// Steps between gradient/parameter norm logs; 0 disables
    pub watch_every:      usize,
}

/// Sentences and group labels the evaluator embeds at each eval trigger
pub struct EvalSet<'a> {
    pub sentences: &'a [String],
    pub labels:    &'a [String],
}

pub fn run_training<M, S, T, R>(
    settings:    &LoopSettings,
    model:       &mut M,
    source:      &S,
    eval:        &EvalSet,
    tracker:     &mut T,
    checkpoints: &CheckpointManager,
    registry:    &R,
) -> Result<RunState>
where
    M: TripletModel,
    S: TripletSource<Batch = M::Batch>,
    T: ExperimentTracker,
    R: AdapterRegistry,
{
    let mut state = RunState::new();

    for epoch in 0..settings.num_epochs {
        let sampler = source
            .epoch_sampler(epoch)
            .with_context(|| format!("Cannot build triplet sampler for epoch {}", epoch + 1))?;
        state.begin_epoch(epoch, sampler.len());
        tracing::info!(
            "Epoch {}/{}: {} batches",
            epoch + 1,
            settings.num_epochs,
            state.epoch_len,
        );

        let bar = progress::bar(state.epoch_len, "batches");
        for batch in sampler {
            let outcome = model.train_step(batch?)?;
            state.record_step(outcome.loss);
            tracker.log(state.steps, &[("loss", outcome.loss)])?;

            if settings.watch_every > 0 && state.steps % settings.watch_every == 0 {
                let param_norm = model.adapter_param_norm()?;
                tracker.log(state.steps, &[
                    ("gradients/adapter_l2",  outcome.grad_norm),
                    ("parameters/adapter_l2", param_norm),
                ])?;
            }

            if state.due(settings.eval_every) {
                bar.suspend(|| evaluate(model, eval, tracker, &mut state))?;
            }

            if state.due(settings.save_model_every) {
                let path = checkpoints.save(model, state.steps)?;
                let name = checkpoints.hub_name();
                let location = registry
                    .push(&path, &name)
                    .with_context(|| format!("Failed to push '{}' as '{name}'", path.display()))?;
                state.checkpoints += 1;
                let reason = if state.is_epoch_end() { "epoch end" } else { "interval" };
                tracing::debug!("Checkpoint {} ({reason}) available at {location}", state.steps);
            }

            bar.set_message(format!("loss {:.4}", state.average_loss()));
            bar.inc(1);
        }
        bar.finish_and_clear();

        tracing::info!(
            "Epoch {:>3}/{} | steps={} | avg_loss={:.4} | accuracy={:.1}%",
            epoch + 1,
            settings.num_epochs,
            state.steps,
            state.average_loss(),
            state.accuracy * 100.0,
        );
    }

    tracing::info!("Training complete: {} steps, {} checkpoints", state.steps, state.checkpoints);
    Ok(state)
}

fn evaluate<M, T>(model: &M, eval: &EvalSet, tracker: &mut T, state: &mut RunState) -> Result<()>
where
    M: TripletModel,
    T: ExperimentTracker,
{
    let embeddings = model.embed_sentences(eval.sentences)?;
    let report = evaluator::evaluate(&embeddings, eval.labels)?;

    state.accuracy     = report.accuracy;
    state.evaluations += 1;
    tracker.log(state.steps, &report.metrics())?;

    tracing::info!(
        "Eval @ step {}: inner={:.4} across={:.4} accuracy={:.1}%",
        state.steps,
        report.average_inner_distance,
        report.average_across_distance,
        report.accuracy * 100.0,
    );
    Ok(())
}
