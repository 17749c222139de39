//! Padding, collation and lazy batch iteration.

use candle_core::{Device, Tensor};

use crate::data::vocab::PAD_ID;
use crate::error::{Result, SeqTagError};

/// One example as encoder input ids and label ids of equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub token_ids: Vec<u32>,
    pub label_ids: Vec<u32>,
}

impl EncodedExample {
    pub fn new(token_ids: Vec<u32>, label_ids: Vec<u32>) -> Self {
        Self {
            token_ids,
            label_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

/// A group of examples padded to the longest one.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, max_len]` u32, padded with [`PAD_ID`].
    pub token_ids: Tensor,
    /// `[batch, max_len]` u32, padded with label id 0.
    pub label_ids: Tensor,
    /// True length of each row.
    pub lengths: Vec<usize>,
}

impl Batch {
    /// `[batch, max_len]` u8 mask of non-pad positions.
    pub fn padding_mask(&self) -> Result<Tensor> {
        padding_mask(&self.token_ids)
    }
}

/// Mark every position whose token id is not the pad id.
pub fn padding_mask(token_ids: &Tensor) -> Result<Tensor> {
    Ok(token_ids.ne(PAD_ID)?)
}

/// Number of unmasked positions in each row of a `[batch, max_len]` mask.
pub fn mask_counts(mask: &Tensor) -> Result<Vec<usize>> {
    let rows = mask.to_vec2::<u8>()?;
    Ok(rows
        .iter()
        .map(|row| row.iter().filter(|&&m| m != 0).count())
        .collect())
}

/// Pad a group of examples into one [`Batch`] on `device`.
pub fn collate(examples: &[&EncodedExample], device: &Device) -> Result<Batch> {
    let batch_size = examples.len();
    if batch_size == 0 {
        return Err(SeqTagError::Config("cannot collate an empty batch".into()));
    }

    let max_len = examples.iter().map(|ex| ex.len()).max().unwrap_or(0);
    let mut token_ids = vec![PAD_ID; batch_size * max_len];
    let mut label_ids = vec![0u32; batch_size * max_len];
    let mut lengths = Vec::with_capacity(batch_size);

    for (row, example) in examples.iter().enumerate() {
        if example.token_ids.len() != example.label_ids.len() {
            return Err(SeqTagError::Config(format!(
                "example has {} tokens but {} labels",
                example.token_ids.len(),
                example.label_ids.len()
            )));
        }
        let start = row * max_len;
        token_ids[start..start + example.len()].copy_from_slice(&example.token_ids);
        label_ids[start..start + example.len()].copy_from_slice(&example.label_ids);
        lengths.push(example.len());
    }

    Ok(Batch {
        token_ids: Tensor::from_vec(token_ids, (batch_size, max_len), device)?,
        label_ids: Tensor::from_vec(label_ids, (batch_size, max_len), device)?,
        lengths,
    })
}

/// Produces batches lazily, one collation per iteration step.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    examples: Vec<EncodedExample>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    device: Device,
}

impl BatchLoader {
    /// A loader that keeps example order.
    pub fn new(examples: Vec<EncodedExample>, batch_size: usize, device: Device) -> Self {
        Self {
            examples,
            batch_size: batch_size.max(1),
            shuffle: false,
            seed: 0,
            device,
        }
    }

    /// Reshuffle example order every epoch, deterministically from `seed`.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Iterate the batches of epoch `epoch`.
    pub fn batches(&self, epoch: usize) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if self.shuffle {
            let mut rng = oorandom::Rand64::new(u128::from(self.seed.wrapping_add(epoch as u64)));
            for i in (1..order.len()).rev() {
                let j = rng.rand_range(0..(i as u64 + 1)) as usize;
                order.swap(i, j);
            }
        }

        Batches {
            loader: self,
            order,
            cursor: 0,
        }
    }
}

/// Iterator over the batches of one epoch.
pub struct Batches<'a> {
    loader: &'a BatchLoader,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let group: Vec<&EncodedExample> = self.order[self.cursor..end]
            .iter()
            .map(|&idx| &self.loader.examples[idx])
            .collect();
        self.cursor = end;

        Some(collate(&group, &self.loader.device))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}
