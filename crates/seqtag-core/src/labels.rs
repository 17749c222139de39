//! # Label Vocabulary
//!
//! Bijective mapping between entity tag strings (`"O"`, `"B-PER"`, ...) and
//! the integer ids used in label tensors. The mapping is fixed when the
//! vocabulary is built and never changes during training.

use std::collections::HashMap;

use crate::error::{Result, SeqTagError};

/// The tag for tokens outside any entity.
pub const OUTSIDE: &str = "O";

/// Label id <-> label string mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocab {
    id_to_label: Vec<String>,
    label_to_id: HashMap<String, usize>,
}

impl LabelVocab {
    /// Build a vocabulary where each label's id is its position in `labels`.
    ///
    /// Fails on an empty list or duplicate labels, since either would break
    /// the bijection.
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id_to_label: Vec<String> = labels.into_iter().map(Into::into).collect();
        if id_to_label.is_empty() {
            return Err(SeqTagError::Config("label vocabulary is empty".into()));
        }

        let mut label_to_id = HashMap::with_capacity(id_to_label.len());
        for (id, label) in id_to_label.iter().enumerate() {
            if label_to_id.insert(label.clone(), id).is_some() {
                return Err(SeqTagError::Config(format!("duplicate label {label:?}")));
            }
        }

        Ok(Self {
            id_to_label,
            label_to_id,
        })
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    /// Whether the vocabulary is empty (never true for a built vocabulary).
    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }

    /// Id of `label`.
    pub fn label_to_id(&self, label: &str) -> Result<usize> {
        self.label_to_id
            .get(label)
            .copied()
            .ok_or_else(|| SeqTagError::UnknownLabel(label.to_string()))
    }

    /// Label string for `id`.
    pub fn id_to_label(&self, id: usize) -> Result<&str> {
        self.id_to_label
            .get(id)
            .map(String::as_str)
            .ok_or(SeqTagError::UnknownLabelId {
                id,
                len: self.len(),
            })
    }

    /// Map a sequence of ids to owned label strings.
    pub fn decode(&self, ids: &[u32]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| self.id_to_label(id as usize).map(str::to_string))
            .collect()
    }

    /// All labels in id order.
    pub fn labels(&self) -> &[String] {
        &self.id_to_label
    }
}
