//! Training losses over padded batches.

use candle_core::Tensor;
use seqtag_core::{LossKind, Result, SeqTagError};

/// Evaluate `kind` on flat `[n, num_labels]` scores and `[n]` u32 targets.
pub fn compute(kind: LossKind, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let loss = match kind {
        LossKind::CrossEntropy => candle_nn::loss::cross_entropy(logits, targets)?,
    };
    Ok(loss)
}

/// Flat indices of the unmasked positions of a `[batch, len]` mask.
fn mask_indices(mask: &Tensor) -> Result<Tensor> {
    let flat = mask.flatten_all()?.to_vec1::<u8>()?;
    let keep: Vec<u32> = flat
        .iter()
        .enumerate()
        .filter(|(_, m)| **m != 0)
        .map(|(i, _)| i as u32)
        .collect();
    if keep.is_empty() {
        return Err(SeqTagError::Shape("batch has no unmasked positions".into()));
    }
    let len = keep.len();
    Ok(Tensor::from_vec(keep, len, mask.device())?)
}

/// One scalar loss over the non-pad positions of a batch.
///
/// `scores` is `[batch, len, num_labels]`, `labels` and `mask` are
/// `[batch, len]`. Both sides are flattened to `batch * len` rows and only
/// the rows where `mask` is set take part.
pub fn masked_loss(kind: LossKind, scores: &Tensor, labels: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (batch, len, num_labels) = scores.dims3()?;
    if labels.dims() != [batch, len] || mask.dims() != [batch, len] {
        return Err(SeqTagError::Shape(format!(
            "scores are {:?} but labels are {:?} and mask is {:?}",
            scores.dims(),
            labels.dims(),
            mask.dims()
        )));
    }

    let keep = mask_indices(mask)?;
    let flat_scores = scores.reshape((batch * len, num_labels))?.index_select(&keep, 0)?;
    let flat_labels = labels.flatten_all()?.index_select(&keep, 0)?;

    compute(kind, &flat_scores, &flat_labels)
}
