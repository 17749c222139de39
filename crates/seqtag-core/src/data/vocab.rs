//! Token vocabularies for turning words into encoder input ids.

use std::collections::HashMap;
use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;

use crate::data::batch::EncodedExample;
use crate::data::dataset::TrainingExample;
use crate::error::{Result, SeqTagError};
use crate::labels::LabelVocab;

/// Reserved id for padding. Real tokens never map to it.
pub const PAD_ID: u32 = 0;
/// Reserved id for tokens missing from a [`TokenVocab`].
pub const UNK_ID: u32 = 1;

const PAD_TOKEN: &str = "[PAD]";
const UNK_TOKEN: &str = "[UNK]";

/// Word vocabulary built from a training split.
#[derive(Debug, Clone)]
pub struct TokenVocab {
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
}

impl TokenVocab {
    /// Collect every token seen at least `min_freq` times.
    ///
    /// Ids are assigned by descending frequency, ties broken alphabetically,
    /// so the same data always yields the same vocabulary.
    pub fn build<'a, I>(examples: I, min_freq: usize) -> Self
    where
        I: IntoIterator<Item = &'a TrainingExample>,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for example in examples {
            for token in &example.tokens {
                *counts.entry(token.as_str()).or_default() += 1;
            }
        }

        let mut entries: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_freq.max(1))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut id_to_token = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];
        id_to_token.extend(entries.into_iter().map(|(token, _)| token.to_string()));
        let token_to_id = id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as u32))
            .collect();

        Self {
            token_to_id,
            id_to_token,
        }
    }

    pub fn encode(&self, token: &str) -> u32 {
        match self.token_to_id.get(token) {
            Some(&id) if id != PAD_ID => id,
            _ => UNK_ID,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.id_to_token.len()
    }
}

/// A pretrained WordPiece/BPE tokenizer used one word at a time.
pub struct PretrainedTokens {
    tokenizer: HfTokenizer,
    unk_id: u32,
}

impl PretrainedTokens {
    /// Load `tokenizer.json`.
    ///
    /// The tokenizer must reserve id 0 for `[PAD]` (as BERT vocabularies do)
    /// because the padding mask is derived from that id.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let tokenizer = HfTokenizer::from_file(path.as_ref())
            .map_err(|e| SeqTagError::Tokenizer(e.to_string()))?;

        if let Some(pad) = tokenizer.token_to_id(PAD_TOKEN) {
            if pad != PAD_ID {
                return Err(SeqTagError::Tokenizer(format!(
                    "{PAD_TOKEN} has id {pad}, expected {PAD_ID}"
                )));
            }
        }
        let unk_id = tokenizer.token_to_id(UNK_TOKEN).ok_or_else(|| {
            SeqTagError::Tokenizer(format!("vocabulary has no {UNK_TOKEN} token"))
        })?;

        Ok(Self { tokenizer, unk_id })
    }

    /// Id of the word itself when it is in the vocabulary, otherwise the id
    /// of its first sub-word piece.
    pub fn encode(&self, token: &str) -> Result<u32> {
        if let Some(id) = self.tokenizer.token_to_id(token) {
            if id != PAD_ID {
                return Ok(id);
            }
        }

        let encoding = self
            .tokenizer
            .encode(token, false)
            .map_err(|e| SeqTagError::Tokenizer(e.to_string()))?;
        Ok(encoding
            .get_ids()
            .iter()
            .copied()
            .find(|&id| id != PAD_ID)
            .unwrap_or(self.unk_id))
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

/// Maps tokens to encoder input ids, one id per word so that label
/// positions line up with token positions.
pub enum TokenEncoder {
    Vocab(TokenVocab),
    Pretrained(PretrainedTokens),
}

impl TokenEncoder {
    pub fn encode_token(&self, token: &str) -> Result<u32> {
        match self {
            TokenEncoder::Vocab(vocab) => Ok(vocab.encode(token)),
            TokenEncoder::Pretrained(tokens) => tokens.encode(token),
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            TokenEncoder::Vocab(vocab) => vocab.vocab_size(),
            TokenEncoder::Pretrained(tokens) => tokens.vocab_size(),
        }
    }

    /// Encode tokens and tags of one example, truncating to `max_len`.
    pub fn encode_example(
        &self,
        example: &TrainingExample,
        labels: &LabelVocab,
        max_len: Option<usize>,
    ) -> Result<EncodedExample> {
        let len = max_len.map_or(example.len(), |max| example.len().min(max));

        let token_ids = example.tokens[..len]
            .iter()
            .map(|token| self.encode_token(token))
            .collect::<Result<Vec<_>>>()?;
        let label_ids = example.labels[..len]
            .iter()
            .map(|label| labels.label_to_id(label).map(|id| id as u32))
            .collect::<Result<Vec<_>>>()?;

        Ok(EncodedExample::new(token_ids, label_ids))
    }

    /// Encode a whole split.
    pub fn encode_all(
        &self,
        examples: &[TrainingExample],
        labels: &LabelVocab,
        max_len: Option<usize>,
    ) -> Result<Vec<EncodedExample>> {
        examples
            .iter()
            .map(|example| self.encode_example(example, labels, max_len))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples() -> Vec<TrainingExample> {
        let ex = |tokens: &[&str], labels: &[&str]| {
            TrainingExample::new(
                tokens.iter().map(|t| t.to_string()).collect(),
                labels.iter().map(|l| l.to_string()).collect(),
            )
        };
        vec![
            ex(&["John", "lives", "in", "Paris"], &["B-PER", "O", "O", "B-LOC"]),
            ex(&["Mary", "lives", "here"], &["B-PER", "O", "O"]),
        ]
    }

    #[test]
    fn test_vocab_reserves_pad_and_unk() {
        let vocab = TokenVocab::build(&examples(), 1);
        // pad + unk + 6 distinct words
        assert_eq!(vocab.vocab_size(), 8);
        // Most frequent word comes first.
        assert_eq!(vocab.encode("lives"), 2);
        assert_eq!(vocab.encode("Berlin"), UNK_ID);
        assert_eq!(vocab.encode(PAD_TOKEN), UNK_ID);
    }

    #[test]
    fn test_min_freq_filters_rare_tokens() {
        let vocab = TokenVocab::build(&examples(), 2);
        assert_eq!(vocab.vocab_size(), 3);
        assert_eq!(vocab.encode("Paris"), UNK_ID);
    }

    #[test]
    fn test_encode_example_truncates() {
        let data = examples();
        let encoder = TokenEncoder::Vocab(TokenVocab::build(&data, 1));
        let labels = LabelVocab::from_labels(["O", "B-PER", "B-LOC"]).unwrap();

        let encoded = encoder.encode_example(&data[0], &labels, Some(2)).unwrap();
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded.label_ids, vec![1, 0]);
        assert!(encoded.token_ids.iter().all(|&id| id != PAD_ID));
    }

    #[test]
    fn test_encode_unknown_label_fails() {
        let data = examples();
        let encoder = TokenEncoder::Vocab(TokenVocab::build(&data, 1));
        let labels = LabelVocab::from_labels(["O", "B-PER"]).unwrap();
        assert!(matches!(
            encoder.encode_all(&data, &labels, None),
            Err(SeqTagError::UnknownLabel(label)) if label == "B-LOC"
        ));
    }
}
