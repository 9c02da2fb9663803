//! DBN piano-roll generation binary.
//!
//! Loads a trained checkpoint, draws random binary top-level codes, runs them
//! down the decoder stack and writes the thresholded rolls as JSON.

use clap::Parser;
use dbn::checkpoint::load_checkpoint;
use dbn::data::roll::{binarize, to_roll};
use dbn::DbnResult;
use log::info;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "dbn-generate",
    about = "Generate piano rolls from a trained DBN checkpoint"
)]
struct Args {
    /// Path to checkpoint file
    #[arg(long, default_value = "data/checkpoints/final.json")]
    checkpoint: PathBuf,

    /// Number of rolls to generate
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Pitch rows per roll
    #[arg(long, default_value_t = 88)]
    pitches: usize,

    /// Time steps per roll
    #[arg(long, default_value_t = 64)]
    steps: usize,

    /// Probabilities above this become notes
    #[arg(long, default_value_t = 0.1)]
    threshold: f32,

    /// RNG seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Output JSON file
    #[arg(long, default_value = "data/output/generated.json")]
    output: PathBuf,
}

#[derive(Serialize)]
struct GeneratedRoll {
    /// Decoder output, one row per pitch
    probabilities: Vec<Vec<f32>>,
    /// `probabilities > threshold`
    notes: Vec<Vec<u8>>,
}

fn rows_of(roll: &Array2<f32>) -> Vec<Vec<f32>> {
    roll.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn run(args: Args) -> DbnResult<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!("Loading checkpoint: {}", args.checkpoint.display());
    let (data, network) = load_checkpoint(&args.checkpoint)?;
    info!(
        "Loaded {:?} network {} -> {:?}",
        data.stage,
        network.n_ins(),
        network.hidden_layer_sizes()
    );

    let code = network.sample_top_code(args.count, &mut rng);
    let output = network.generate(code.view())?;

    let mut rolls = Vec::with_capacity(args.count);
    for row in output.rows() {
        let roll = to_roll(row, args.pitches, args.steps)?;
        let notes = binarize(&roll, args.threshold);
        let on = notes.iter().filter(|&&v| v > 0.0).count();
        info!("Roll {}: {on} active cells", rolls.len());
        rolls.push(GeneratedRoll {
            probabilities: rows_of(&roll),
            notes: notes
                .rows()
                .into_iter()
                .map(|r| r.iter().map(|&v| v as u8).collect())
                .collect(),
        });
    }

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, serde_json::to_string(&rolls)?)?;
    info!("Wrote {} rolls to {}", rolls.len(), args.output.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dbn-generate: {e}");
            ExitCode::FAILURE
        }
    }
}
