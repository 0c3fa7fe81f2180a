// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with clap.
// Business logic is delegated to Layer 2 (application).
//
//   triplet-lora            - train with every default and the
//                             default LoRA preset
//   triplet-lora train ...  - train with a config file and/or flags
//
// The resolved configuration is printed before training starts.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, TrainArgs};

use crate::application::config::{TrainConfig, TrainOptions};
use crate::application::train_use_case::TrainUseCase;

#[derive(Parser, Debug)]
#[command(
    name = "triplet-lora",
    version,
    about = "Fine-tune a sentence encoder with LoRA adapters and a triplet margin loss."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            None => run_train(TrainArgs::default().into_options()?, false),
            Some(Commands::Train(args)) => {
                let dry_run = args.dry_run;
                run_train(args.into_options()?, dry_run)
            }
        }
    }
}

fn run_train(options: TrainOptions, dry_run: bool) -> Result<()> {
    let config = TrainConfig::resolve(options);
    print!("{}", format_arguments(&config));

    if dry_run {
        config.validate()?;
        return Ok(());
    }

    let state = TrainUseCase::new(config).execute()?;
    println!(
        "Training complete: {} steps, {} checkpoints, last accuracy {:.1}%",
        state.steps,
        state.checkpoints,
        state.accuracy * 100.0,
    );
    Ok(())
}

/// `Arguments:` followed by one `key: value` line per resolved option.
fn format_arguments(config: &TrainConfig) -> String {
    let mut out = String::from("Arguments:\n");
    for (key, value) in config.entries() {
        out.push_str(&format!("{key}: {value}\n"));
    }
    out
}
