//! The epoch loop: train, evaluate, keep the best checkpoint, and finish
//! with an evaluation of the best parameters.

use std::path::{Path, PathBuf};

use anyhow::Context;
use seqtag_core::data::{PretrainedTokens, load_dataset};
use seqtag_core::{
    BatchLoader, BertCnn, EncodedExample, EncoderConfig, LabelVocab, SequenceTagger, TokenEncoder,
    TokenVocab, TrainConfig, TrainingExample,
};
use tracing::{info, warn};

use crate::trainer::{EvalReport, Trainer};

/// Outcome of a full training run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Highest dev F1 seen after any epoch.
    pub best_f1: f64,
    /// Epoch that reached `best_f1`, if any epoch beat 0.0.
    pub best_epoch: Option<usize>,
    /// Dev scores of the parameters restored from the best checkpoint.
    pub final_report: EvalReport,
    /// Checkpoint holding the best parameters, if one was written.
    pub checkpoint: Option<PathBuf>,
}

fn load_split(path: &Path) -> anyhow::Result<Vec<TrainingExample>> {
    let examples =
        load_dataset(path).with_context(|| format!("failed to load {}", path.display()))?;
    info!(path = %path.display(), examples = examples.len(), "Loaded split");
    Ok(examples)
}

fn build_token_encoder(
    config: &TrainConfig,
    train: &[TrainingExample],
) -> anyhow::Result<TokenEncoder> {
    let encoder = match &config.encoder {
        EncoderConfig::Bert { path } => {
            let tokenizer_path = path.join("tokenizer.json");
            let tokens = PretrainedTokens::from_file(&tokenizer_path)
                .with_context(|| format!("failed to load {}", tokenizer_path.display()))?;
            TokenEncoder::Pretrained(tokens)
        }
        EncoderConfig::Embedding { min_freq, .. } => {
            TokenEncoder::Vocab(TokenVocab::build(train, *min_freq))
        }
    };
    info!(vocab_size = encoder.vocab_size(), "Built token encoder");
    Ok(encoder)
}

fn encode_split(
    encoder: &TokenEncoder,
    examples: &[TrainingExample],
    labels: &LabelVocab,
    max_len: Option<usize>,
    split: &str,
) -> anyhow::Result<Vec<EncodedExample>> {
    let encoded = encoder
        .encode_all(examples, labels, max_len)
        .with_context(|| format!("failed to encode the {split} split"))?;

    let total = encoded.len();
    let kept: Vec<EncodedExample> = encoded.into_iter().filter(|ex| !ex.is_empty()).collect();
    if kept.len() < total {
        warn!(split, skipped = total - kept.len(), "Skipped empty examples");
    }
    if kept.is_empty() {
        anyhow::bail!("the {split} split has no usable examples");
    }
    Ok(kept)
}

/// Build data, model and trainer from `config`, then run the epoch loop.
pub fn run_training(config: &TrainConfig, show_progress: bool) -> anyhow::Result<RunSummary> {
    config.validate().context("invalid configuration")?;
    info!("\n{}", serde_json::to_string_pretty(config)?);

    let device = config.device.device().context("failed to open device")?;
    let labels = config.label_vocab()?;

    let train_examples = load_split(&config.train_path())?;
    let dev_examples = load_split(&config.dev_path())?;
    let encoder = build_token_encoder(config, &train_examples)?;

    let train = encode_split(&encoder, &train_examples, &labels, config.max_len, "train")?;
    let dev = encode_split(&encoder, &dev_examples, &labels, config.max_len, "dev")?;
    let train_loader =
        BatchLoader::new(train, config.batch_size, device.clone()).shuffled(config.seed);
    let dev_loader = BatchLoader::new(dev, config.batch_size, device.clone());

    info!("Building Model");
    let model = BertCnn::new(config, encoder.vocab_size(), &device)
        .context("failed to build the model")?;
    let mut trainer = Trainer::new(model, config)?.with_progress(show_progress);

    run_epochs(&mut trainer, config.epochs, &train_loader, &dev_loader)
}

/// Train for `epochs` epochs, checkpointing whenever dev F1 improves, then
/// restore the best checkpoint and evaluate it once more.
pub fn run_epochs<M: SequenceTagger>(
    trainer: &mut Trainer<M>,
    epochs: usize,
    train_loader: &BatchLoader,
    dev_loader: &BatchLoader,
) -> anyhow::Result<RunSummary> {
    let mut best_f1 = 0.0;
    let mut best_epoch = None;

    for epoch in 0..epochs {
        info!("Epoch: {epoch}");
        trainer
            .train(epoch, train_loader)
            .with_context(|| format!("training epoch {epoch} failed"))?;
        let f1 = trainer
            .eval(epoch, dev_loader)
            .with_context(|| format!("evaluating epoch {epoch} failed"))?
            .f1;

        if f1 > best_f1 {
            best_f1 = f1;
            best_epoch = Some(epoch);
            trainer.save().context("failed to save checkpoint")?;
        }
    }

    let checkpoint = if best_epoch.is_some() {
        trainer.load(None).context("failed to restore the best checkpoint")?;
        Some(trainer.checkpoint_path().to_path_buf())
    } else {
        warn!("No epoch scored above 0 F1; evaluating the last parameters");
        None
    };

    let final_report = trainer.eval("Final", dev_loader)?;
    info!("Best DEV F1: {best_f1:3.4}");

    Ok(RunSummary {
        best_f1,
        best_epoch,
        final_report,
        checkpoint,
    })
}
