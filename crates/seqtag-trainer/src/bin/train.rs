//! Train a BERT-CNN tagger on one dataset and report dev F1.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::{ArgAction, Parser};
use seqtag_core::{DeviceSelector, TrainConfig};
use seqtag_trainer::run_training;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// CLI arguments
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train and evaluate a BERT-CNN sequence tagger")]
#[command(version)]
struct Cli {
    /// Configuration document
    #[arg(short, long, env = "SEQTAG_CONFIG", default_value = "./config/conll.json")]
    config: PathBuf,

    /// Checkpoint root directory
    #[arg(long, env = "SEQTAG_SAVE_PATH")]
    save_path: Option<PathBuf>,

    /// Pretrained BERT directory (config.json, model.safetensors, tokenizer.json)
    #[arg(long, alias = "bert-name")]
    encoder: Option<PathBuf>,

    /// Device: cpu, gpu, cuda:N or metal
    #[arg(long, env = "SEQTAG_DEVICE")]
    device: Option<DeviceSelector>,

    /// Number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Examples per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// AdamW learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Shuffle seed
    #[arg(long)]
    seed: Option<u64>,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Hide per-batch progress bars
    #[arg(long)]
    no_progress: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn level(&self) -> Level {
        if self.quiet {
            return Level::WARN;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn load_config(&self) -> anyhow::Result<TrainConfig> {
        let mut config = TrainConfig::from_file(&self.config)
            .with_context(|| format!("failed to read {}", self.config.display()))?;

        if let Some(save_path) = &self.save_path {
            config = config.with_save_path(save_path);
        }
        if let Some(encoder) = &self.encoder {
            config = config.with_bert_encoder(encoder);
        }
        if let Some(device) = self.device {
            config = config.with_device(device);
        }
        if let Some(epochs) = self.epochs {
            config = config.with_epochs(epochs);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(learning_rate) = self.learning_rate {
            config = config.with_learning_rate(learning_rate);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: Level, log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.level(), cli.log_file.as_deref())?;
    let config = cli.load_config()?;
    run_training(&config, !cli.no_progress)?;
    Ok(())
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Training failed: {e:#}");
        std::process::exit(1);
    }
}
