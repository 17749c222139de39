use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing data, building the tagger or
/// training it.
#[derive(Debug, Error)]
pub enum SeqTagError {
    /// A configuration value is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configured loss selector is not one of the supported kinds.
    #[error("unsupported loss type: {0:?}")]
    UnsupportedLoss(String),

    /// The configured device selector could not be resolved.
    #[error("unsupported device: {0:?}")]
    UnsupportedDevice(String),

    /// A label string is not part of the label vocabulary.
    #[error("unknown label: {0:?}")]
    UnknownLabel(String),

    /// A label id is outside the label vocabulary.
    #[error("label id {id} is out of range for {len} labels")]
    UnknownLabelId {
        /// The offending id.
        id: usize,
        /// Size of the vocabulary.
        len: usize,
    },

    /// A dataset file could not be parsed.
    #[error("{path}:{line}: {message}")]
    Dataset {
        /// File being read.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// Model output or label tensors have an unexpected shape.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Gold and predicted label sequences do not line up.
    #[error("metric inputs differ: {0}")]
    MetricMismatch(String),

    /// Scoring was asked for with no sentences at all.
    #[error("no label sequences to score")]
    NothingToScore,

    /// The pretrained tokenizer failed to load or encode.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// No checkpoint exists at the resolved path.
    #[error("checkpoint not found at {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Safetensors file could not be decoded.
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Candle tensor framework error (shape mismatch, device failure, ...).
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for seqtag operations.
pub type Result<T> = std::result::Result<T, SeqTagError>;
