//! # Sequence Tagging Models
//!
//! The trainer only needs three things from a model: a per-token score
//! tensor, the parameter store the optimizer updates and checkpoints, and a
//! name for the checkpoint file. [`SequenceTagger`] is that seam.

pub mod bert_cnn;

pub use bert_cnn::BertCnn;

use candle_core::Tensor;
use candle_nn::VarMap;

/// A trainable model mapping token ids to per-token label scores.
pub trait SequenceTagger {
    /// Model identifier, used as the checkpoint file stem.
    fn name(&self) -> &str;

    /// `input_ids`: `[batch, len]` u32, returns `[batch, len, num_labels]`
    /// f32 scores. `train` enables dropout.
    fn forward_t(&self, input_ids: &Tensor, train: bool) -> candle_core::Result<Tensor>;

    /// Every learnable parameter of the model.
    fn varmap(&self) -> &VarMap;
}
