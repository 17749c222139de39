//! # Seqtag Core
//!
//! Building blocks of the seqtag NER trainer: label vocabularies, dataset
//! loading and padding, the BERT-CNN tagger, and entity-level
//! sequence-labeling metrics.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqtag_core::metrics::evaluate;
//!
//! let gold = vec![vec!["B-PER", "I-PER", "O", "B-LOC"]];
//! let pred = vec![vec!["B-PER", "I-PER", "O", "O"]];
//! let report = evaluate(&gold, &pred).unwrap();
//!
//! assert_eq!(report.overall.precision, 1.0);
//! assert_eq!(report.overall.recall, 0.5);
//! ```
pub mod config;
pub mod data;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod table;

// Re-export primary API
pub use config::{DeviceSelector, EncoderConfig, HeadConfig, LossKind, TrainConfig};
pub use data::{
    Batch, BatchLoader, EncodedExample, TokenEncoder, TokenVocab, TrainingExample, load_dataset,
    padding_mask,
};
pub use error::{Result, SeqTagError};
pub use labels::LabelVocab;
pub use metrics::{LabelSequences, Scores, SequenceReport};
pub use model::{BertCnn, SequenceTagger};
pub use table::Table;
