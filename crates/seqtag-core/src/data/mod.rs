pub mod batch;
pub mod dataset;
pub mod vocab;

pub use batch::{Batch, BatchLoader, Batches, EncodedExample, collate, mask_counts, padding_mask};
pub use dataset::{TrainingExample, load_bio_dataset, load_dataset, load_jsonl_dataset};
pub use vocab::{PAD_ID, PretrainedTokens, TokenEncoder, TokenVocab, UNK_ID};
