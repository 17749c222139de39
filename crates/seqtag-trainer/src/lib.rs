//! # Seqtag Trainer
//!
//! Supervised training and evaluation of the BERT-CNN tagger: masked loss,
//! the per-epoch train/eval passes, best-F1 checkpointing and the driver
//! loop behind the `train` binary.

pub mod loss;
pub mod run;
pub mod trainer;

pub use loss::masked_loss;
pub use run::{RunSummary, run_epochs, run_training};
pub use trainer::{EvalReport, TrainReport, Trainer};
