//! Training loop for the sequence tagger.

use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::{D, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use seqtag_core::data::PAD_ID;
use seqtag_core::{
    Batch, BatchLoader, LabelSequences, LabelVocab, LossKind, Result, SeqTagError, SequenceReport,
    SequenceTagger, Table, TrainConfig,
};
use tracing::{Span, debug, info, info_span};

use crate::loss::masked_loss;

/// What one training epoch produced.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Mean of the per-batch losses.
    pub mean_loss: f32,
    /// Gold and arg-max predicted tags of every training example, as seen
    /// before each batch's update. Not scored.
    pub sequences: LabelSequences,
}

/// Dev scores of one evaluation pass, as shown in the `Dev` table.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    /// Entity-level F1.
    pub f1: f64,
    /// Token accuracy (seqeval's `accuracy_score`), reported in the
    /// precision column.
    pub precision: f64,
    /// Entity-level recall.
    pub recall: f64,
    /// Full entity-level breakdown, including entity precision.
    pub scores: SequenceReport,
}

impl EvalReport {
    pub fn new(scores: SequenceReport) -> Self {
        Self {
            f1: scores.overall.f1,
            precision: scores.accuracy,
            recall: scores.overall.recall,
            scores,
        }
    }

    /// `[title, F1, Precision, Recall]` with a single `Metrics` row.
    pub fn table(&self, title: impl fmt::Display) -> Table {
        let mut table = Table::new([title.to_string(), "F1".into(), "Precision".into(), "Recall".into()]);
        table.add_row(
            std::iter::once("Metrics".to_string())
                .chain([self.f1, self.precision, self.recall].iter().map(|x| format!("{x:3.4}"))),
        );
        table
    }
}

pub struct Trainer<M: SequenceTagger> {
    model: M,
    labels: LabelVocab,
    loss: LossKind,
    optimizer: AdamW,
    checkpoint_path: PathBuf,
    show_progress: bool,
    span: Span,
}

impl<M: SequenceTagger> Trainer<M> {
    /// Set up AdamW over every parameter of `model` with the configured
    /// learning rate and weight decay.
    pub fn new(model: M, config: &TrainConfig) -> Result<Self> {
        let labels = config.label_vocab()?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(model.varmap().all_vars(), params)?;
        let checkpoint_path = config.checkpoint_path_for(model.name());
        let span = info_span!("trainer", dataset = %config.dataset, model = %model.name());

        Ok(Self {
            model,
            labels,
            loss: config.loss_type,
            optimizer,
            checkpoint_path,
            show_progress: false,
            span,
        })
    }

    /// Show a progress bar per epoch.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn labels(&self) -> &LabelVocab {
        &self.labels
    }

    /// Where [`Trainer::save`] writes.
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// One pass over `loader` with dropout on and one optimizer step per batch.
    pub fn train(&mut self, epoch: usize, loader: &BatchLoader) -> Result<TrainReport> {
        let span = self.span.clone();
        let _guard = span.enter();

        let progress = self.progress_bar(loader.len(), format!("Train {epoch}"));
        let mut losses = Vec::with_capacity(loader.len());
        let mut sequences = LabelSequences::new();

        for batch in loader.batches(epoch) {
            let batch = batch?;
            let scores = self.model.forward_t(&batch.token_ids, true)?;
            self.collect_sequences(&batch, &scores, &mut sequences)?;
            let mask = batch.padding_mask()?;
            let loss = masked_loss(self.loss, &scores, &batch.label_ids, &mask)?;

            {
                // Gradients live for exactly one step.
                let grads = loss.backward()?;
                self.optimizer.step(&grads)?;
            }

            let value = loss.to_scalar::<f32>()?;
            losses.push(value);

            progress.set_message(format!("loss {value:.4}"));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let mean_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };

        let mut table = Table::new([format!("Train {epoch}"), "Loss".to_string()]);
        table.add_row(["Metrics".to_string(), format!("{mean_loss:.4}")]);
        info!("\n{table}");

        Ok(TrainReport {
            mean_loss,
            sequences,
        })
    }

    /// One pass over `loader` without dropout or parameter updates, scored
    /// with entity-level recall and F1 plus token accuracy.
    ///
    /// An empty loader is an error rather than a perfect score.
    pub fn eval(&self, epoch: impl fmt::Display, loader: &BatchLoader) -> Result<EvalReport> {
        let _guard = self.span.enter();

        let progress = self.progress_bar(loader.len(), format!("Dev {epoch}"));
        let mut sequences = LabelSequences::new();
        for batch in loader.batches(0) {
            let batch = batch?;
            let scores = self.model.forward_t(&batch.token_ids, false)?;
            self.collect_sequences(&batch, &scores, &mut sequences)?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        let report = EvalReport::new(sequences.evaluate()?);
        info!("\n{}", report.table(format!("Dev {epoch}")));

        let overall = report.scores.overall;
        debug!(
            precision = overall.precision,
            support = overall.support,
            "entity precision"
        );
        for (entity_type, scores) in &report.scores.per_type {
            debug!(
                entity_type = %entity_type,
                precision = scores.precision,
                recall = scores.recall,
                f1 = scores.f1,
                support = scores.support,
                "per-type scores"
            );
        }

        Ok(report)
    }

    /// Write every parameter to the checkpoint path, replacing any earlier
    /// checkpoint.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.checkpoint_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.model.varmap().save(&self.checkpoint_path)?;
        info!(path = %self.checkpoint_path.display(), "Saved checkpoint");
        Ok(())
    }

    /// Restore parameters in place from `path`, or from the checkpoint path
    /// when `None`.
    pub fn load(&mut self, path: Option<&Path>) -> Result<()> {
        let path = path.unwrap_or(&self.checkpoint_path);
        if !path.is_file() {
            return Err(SeqTagError::CheckpointNotFound(path.to_path_buf()));
        }

        // VarMap clones share their variables, so this writes into the model.
        let mut varmap = self.model.varmap().clone();
        varmap.load(path)?;
        info!(path = %path.display(), "Loaded checkpoint");
        Ok(())
    }

    /// Strip padding from gold and arg-max predicted ids row by row and
    /// record both as tag strings.
    fn collect_sequences(&self, batch: &Batch, scores: &Tensor, out: &mut LabelSequences) -> Result<()> {
        let (rows, len) = batch.token_ids.dims2()?;
        let (score_rows, score_len, num_labels) = scores.dims3()?;
        if (score_rows, score_len) != (rows, len) || num_labels != self.labels.len() {
            return Err(SeqTagError::Shape(format!(
                "model produced {:?} scores for a [{rows}, {len}] batch with {} labels",
                scores.dims(),
                self.labels.len()
            )));
        }

        let tokens = batch.token_ids.to_vec2::<u32>()?;
        let gold = batch.label_ids.to_vec2::<u32>()?;
        let predicted = scores.argmax(D::Minus1)?.to_vec2::<u32>()?;

        for ((token_row, gold_row), pred_row) in tokens.iter().zip(&gold).zip(&predicted) {
            let keep: Vec<usize> = token_row
                .iter()
                .enumerate()
                .filter(|(_, id)| **id != PAD_ID)
                .map(|(i, _)| i)
                .collect();
            let gold_ids: Vec<u32> = keep.iter().map(|&i| gold_row[i]).collect();
            let pred_ids: Vec<u32> = keep.iter().map(|&i| pred_row[i]).collect();
            out.push(self.labels.decode(&gold_ids)?, self.labels.decode(&pred_ids)?);
        }
        Ok(())
    }

    fn progress_bar(&self, len: usize, prefix: String) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_prefix(prefix);
        progress
    }
}
