//! # Training Configuration
//!
//! The structured document that drives a training run. It is read once from
//! a JSON file, optionally overridden from the command line, validated, and
//! then passed explicitly to everything that needs it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqTagError};
use crate::labels::LabelVocab;

/// Supported training losses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LossKind {
    /// Token-level cross entropy over non-pad positions.
    CrossEntropy,
}

impl LossKind {
    /// The selector used in configuration documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::CrossEntropy => "ce",
        }
    }
}

impl FromStr for LossKind {
    type Err = SeqTagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ce" | "cross_entropy" => Ok(LossKind::CrossEntropy),
            other => Err(SeqTagError::UnsupportedLoss(other.to_string())),
        }
    }
}

impl TryFrom<String> for LossKind {
    type Error = SeqTagError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LossKind> for String {
    fn from(kind: LossKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where tensors live for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSelector {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceSelector {
    /// Open the selected device.
    ///
    /// Selecting an accelerator the binary was not built for is an error,
    /// never a silent fallback to the CPU.
    pub fn device(&self) -> Result<Device> {
        let device = match self {
            DeviceSelector::Cpu => Device::Cpu,
            DeviceSelector::Cuda(ordinal) => Device::new_cuda(*ordinal)?,
            DeviceSelector::Metal(ordinal) => Device::new_metal(*ordinal)?,
        };
        Ok(device)
    }
}

impl FromStr for DeviceSelector {
    type Err = SeqTagError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let parse_ordinal = |rest: &str| {
            rest.parse::<usize>()
                .map_err(|_| SeqTagError::UnsupportedDevice(s.to_string()))
        };

        match lower.as_str() {
            "cpu" => Ok(DeviceSelector::Cpu),
            "gpu" | "cuda" => Ok(DeviceSelector::Cuda(0)),
            "metal" | "mps" => Ok(DeviceSelector::Metal(0)),
            other => {
                if let Some(rest) = other.strip_prefix("cuda:").or_else(|| other.strip_prefix("gpu:")) {
                    Ok(DeviceSelector::Cuda(parse_ordinal(rest)?))
                } else if let Some(rest) = other.strip_prefix("metal:") {
                    Ok(DeviceSelector::Metal(parse_ordinal(rest)?))
                } else {
                    Err(SeqTagError::UnsupportedDevice(s.to_string()))
                }
            }
        }
    }
}

impl TryFrom<String> for DeviceSelector {
    type Error = SeqTagError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceSelector> for String {
    fn from(selector: DeviceSelector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Cpu => write!(f, "cpu"),
            DeviceSelector::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            DeviceSelector::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}

/// The token encoder underneath the convolutional head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderConfig {
    /// A pretrained BERT checkpoint directory holding `config.json`,
    /// `model.safetensors` and `tokenizer.json`.
    Bert { path: PathBuf },
    /// A randomly initialised embedding table over a vocabulary built from
    /// the training split.
    Embedding {
        #[serde(default = "default_hidden_size")]
        hidden_size: usize,
        #[serde(default = "default_min_freq")]
        min_freq: usize,
    },
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig::Embedding {
            hidden_size: default_hidden_size(),
            min_freq: default_min_freq(),
        }
    }
}

/// Convolutional tagging head settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    pub conv_channels: usize,
    pub kernel_size: usize,
    pub dropout: f32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            conv_channels: 256,
            kernel_size: 3,
            dropout: 0.1,
        }
    }
}

/// Everything a training run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Dataset name; keys both the data directory and the checkpoint directory.
    pub dataset: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_train_file")]
    pub train_file: PathBuf,
    #[serde(default = "default_dev_file")]
    pub dev_file: PathBuf,
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_loss_type")]
    pub loss_type: LossKind,
    #[serde(default = "default_learning_rate", alias = "bert_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    pub label_num: usize,
    /// Label vocabulary; a label's id is its index in this list.
    pub labels: Vec<String>,
    #[serde(default = "default_device")]
    pub device: DeviceSelector,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Sequences longer than this are truncated.
    #[serde(default)]
    pub max_len: Option<usize>,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub head: HeadConfig,
}

fn default_hidden_size() -> usize {
    128
}

fn default_min_freq() -> usize {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_train_file() -> PathBuf {
    PathBuf::from("train.jsonl")
}

fn default_dev_file() -> PathBuf {
    PathBuf::from("dev.jsonl")
}

fn default_save_path() -> PathBuf {
    PathBuf::from("./outputs")
}

fn default_model_name() -> String {
    "bert_cnn".to_string()
}

fn default_loss_type() -> LossKind {
    LossKind::CrossEntropy
}

fn default_learning_rate() -> f64 {
    1e-5
}

fn default_batch_size() -> usize {
    16
}

fn default_epochs() -> usize {
    10
}

fn default_device() -> DeviceSelector {
    DeviceSelector::Cpu
}

fn default_seed() -> u64 {
    42
}

impl TrainConfig {
    /// Read and validate a JSON configuration document.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrainConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.trim().is_empty() {
            return Err(SeqTagError::Config("dataset name is empty".into()));
        }
        if self.labels.is_empty() {
            return Err(SeqTagError::Config("labels must not be empty".into()));
        }
        if self.label_num != self.labels.len() {
            return Err(SeqTagError::Config(format!(
                "label_num is {} but {} labels are configured",
                self.label_num,
                self.labels.len()
            )));
        }
        if self.batch_size == 0 {
            return Err(SeqTagError::Config("batch_size must be positive".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(SeqTagError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(SeqTagError::Config(format!(
                "weight_decay must not be negative, got {}",
                self.weight_decay
            )));
        }
        if self.max_len == Some(0) {
            return Err(SeqTagError::Config("max_len must be positive".into()));
        }
        if self.head.kernel_size == 0 || self.head.kernel_size % 2 == 0 {
            return Err(SeqTagError::Config(format!(
                "head.kernel_size must be odd, got {}",
                self.head.kernel_size
            )));
        }
        if self.head.conv_channels == 0 {
            return Err(SeqTagError::Config("head.conv_channels must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.head.dropout) {
            return Err(SeqTagError::Config(format!(
                "head.dropout must be in [0, 1), got {}",
                self.head.dropout
            )));
        }
        if let EncoderConfig::Embedding { hidden_size: 0, .. } = self.encoder {
            return Err(SeqTagError::Config("encoder.hidden_size must be positive".into()));
        }
        // Duplicates are caught by the vocabulary itself.
        LabelVocab::from_labels(self.labels.iter().cloned())?;
        Ok(())
    }

    /// Build the label vocabulary described by `labels`.
    pub fn label_vocab(&self) -> Result<LabelVocab> {
        LabelVocab::from_labels(self.labels.iter().cloned())
    }

    /// Directory holding this dataset's splits.
    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join(&self.dataset)
    }

    /// Training split path.
    pub fn train_path(&self) -> PathBuf {
        self.dataset_dir().join(&self.train_file)
    }

    /// Held-out split path.
    pub fn dev_path(&self) -> PathBuf {
        self.dataset_dir().join(&self.dev_file)
    }

    /// `<save_path>/<dataset>/<model_name>.safetensors`
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path_for(&self.model_name)
    }

    /// Checkpoint path of the model called `model_name` under this run's
    /// save path and dataset.
    pub fn checkpoint_path_for(&self, model_name: &str) -> PathBuf {
        self.save_path
            .join(&self.dataset)
            .join(format!("{model_name}.safetensors"))
    }

    /// Override the checkpoint root.
    pub fn with_save_path(mut self, save_path: impl Into<PathBuf>) -> Self {
        self.save_path = save_path.into();
        self
    }

    /// Override the device.
    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.device = device;
        self
    }

    /// Switch to a pretrained BERT encoder at `path`.
    pub fn with_bert_encoder(mut self, path: impl Into<PathBuf>) -> Self {
        self.encoder = EncoderConfig::Bert { path: path.into() };
        self
    }

    /// Override the epoch count.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Override the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Override the shuffle seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
