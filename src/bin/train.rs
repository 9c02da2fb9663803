//! DBN training binary.
//!
//! Pretrains a DBN layer by layer on a JSON dataset of piano-roll rows, then
//! finetunes it on the reconstruction loss. Writes an `initial.json`
//! checkpoint after pretraining and `final.json` after finetuning.

use clap::Parser;
use dbn::checkpoint::{load_checkpoint, save_checkpoint, Stage};
use dbn::data::{is_unit_interval, load_rows};
use dbn::{finetune, pretrain, Backprop, Dbn, FinetuneConfig, PretrainConfig};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "dbn-train",
    about = "Pretrain and finetune a DBN on piano-roll rows"
)]
struct Args {
    /// JSON file holding an array of rows with values in [0, 1]
    #[arg(long, default_value = "data/rolls.json")]
    data: PathBuf,

    /// Held-out rows for validation (defaults to reusing the training rows)
    #[arg(long)]
    validation_data: Option<PathBuf>,

    /// Checkpoint directory
    #[arg(long, default_value = "data/checkpoints")]
    checkpoint_dir: PathBuf,

    /// Hidden layer sizes, bottom to top
    #[arg(long, value_delimiter = ',', default_value = "256,128,64")]
    hidden: Vec<usize>,

    /// Pretraining epochs per layer
    #[arg(long, default_value_t = 100)]
    pretrain_epochs: usize,

    /// Pretraining learning rate
    #[arg(long, default_value_t = 0.01)]
    pretrain_lr: f32,

    /// Gibbs steps per CD update
    #[arg(long, default_value_t = 1)]
    k: usize,

    /// Maximum finetuning epochs
    #[arg(long, default_value_t = 1000)]
    finetune_epochs: usize,

    /// Finetuning learning rate
    #[arg(long, default_value_t = 0.01)]
    finetune_lr: f32,

    /// Mini-batch size
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// RNG seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Start from this checkpoint instead of a fresh network
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Skip pretraining (use with --resume on a pretrained checkpoint)
    #[arg(long, default_value_t = false)]
    skip_pretrain: bool,
}

fn run(args: Args) -> dbn::DbnResult<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let train = load_rows(&args.data)?;
    if !is_unit_interval(&train) {
        warn!("Training data has values outside [0, 1]");
    }
    let validation = args
        .validation_data
        .as_deref()
        .map(load_rows)
        .transpose()?;
    info!(
        "Loaded {} rows of width {} from {}",
        train.nrows(),
        train.ncols(),
        args.data.display()
    );

    let mut network = match &args.resume {
        Some(path) => {
            let (data, network) = load_checkpoint(path)?;
            info!(
                "Resumed from {} ({:?}, layers {:?})",
                path.display(),
                data.stage,
                data.hidden_layer_sizes
            );
            network
        }
        None => Dbn::new(train.ncols(), &args.hidden, &mut rng)?,
    };
    info!(
        "Network: {} -> {:?}",
        network.n_ins(),
        network.hidden_layer_sizes()
    );

    if !args.skip_pretrain {
        let config = PretrainConfig {
            epochs: args.pretrain_epochs,
            learning_rate: args.pretrain_lr,
            k: args.k,
            batch_size: args.batch_size,
        };
        let start = Instant::now();
        pretrain(&mut network, train.view(), &config, &mut rng)?;
        info!(
            "Pretraining ran for {:.2}m",
            start.elapsed().as_secs_f32() / 60.0
        );
        save_checkpoint(
            &network,
            &args.checkpoint_dir.join("initial.json"),
            Stage::Pretrained,
            None,
        )?;
    }

    let config = FinetuneConfig {
        epochs: args.finetune_epochs,
        learning_rate: args.finetune_lr,
        batch_size: args.batch_size,
        check_divergence: true,
    };
    let start = Instant::now();
    let report = finetune(
        &mut network,
        train.view(),
        validation.as_ref().map(|v| v.view()),
        &config,
        &Backprop,
    )?;
    info!(
        "Finetuning ran for {:.2}m ({} epochs, best {:.6} at iteration {:?})",
        start.elapsed().as_secs_f32() / 60.0,
        report.epochs_run,
        report.best_loss,
        report.best_iter
    );

    let best = report.best_iter.map(|_| report.best_loss);
    save_checkpoint(
        &network,
        &args.checkpoint_dir.join("final.json"),
        Stage::Finetuned,
        best,
    )?;
    info!("Saved {}", args.checkpoint_dir.join("final.json").display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dbn-train: {e}");
            ExitCode::FAILURE
        }
    }
}
