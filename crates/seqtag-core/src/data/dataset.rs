//! Data loading for BIO-tagged training data.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqTagError};

/// A single labeled sentence: parallel token and tag sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub tokens: Vec<String>,
    #[serde(rename = "ner_tags")]
    pub labels: Vec<String>,
}

impl TrainingExample {
    pub fn new(tokens: Vec<String>, labels: Vec<String>) -> Self {
        Self { tokens, labels }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Load a dataset split, choosing the format from the file extension.
///
/// `.jsonl` and `.json` files hold one `{"tokens": [...], "ner_tags": [...]}`
/// object per line; everything else is read as CoNLL-style columns.
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingExample>> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("jsonl") | Some("json") => load_jsonl_dataset(path),
        _ => load_bio_dataset(path),
    }
}

/// Load a dataset written as JSON lines.
pub fn load_jsonl_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingExample>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut examples = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let example: TrainingExample =
            serde_json::from_str(line).map_err(|e| SeqTagError::Dataset {
                path: path.to_path_buf(),
                line: idx + 1,
                message: e.to_string(),
            })?;

        if example.tokens.len() != example.labels.len() {
            return Err(SeqTagError::Dataset {
                path: path.to_path_buf(),
                line: idx + 1,
                message: format!(
                    "{} tokens but {} tags",
                    example.tokens.len(),
                    example.labels.len()
                ),
            });
        }
        examples.push(example);
    }

    Ok(examples)
}

/// Load dataset from BIO format file.
///
/// One `token<TAB>label` pair per line with blank lines between sentences.
/// Whitespace-separated CoNLL-2003 rows are accepted too, taking the first
/// column as the token and the last as the tag.
pub fn load_bio_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingExample>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut examples = Vec::new();
    let mut current_tokens = Vec::new();
    let mut current_labels = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            if !current_tokens.is_empty() {
                examples.push(TrainingExample::new(
                    std::mem::take(&mut current_tokens),
                    std::mem::take(&mut current_labels),
                ));
            }
            continue;
        }

        if line.starts_with('#') || line.starts_with("-DOCSTART-") {
            continue;
        }

        let (token, label) = split_row(line).ok_or_else(|| SeqTagError::Dataset {
            path: path.to_path_buf(),
            line: idx + 1,
            message: format!("expected a token and a tag, got {line:?}"),
        })?;

        current_tokens.push(token.to_string());
        current_labels.push(label.to_string());
    }

    // Don't forget the last example
    if !current_tokens.is_empty() {
        examples.push(TrainingExample::new(current_tokens, current_labels));
    }

    Ok(examples)
}

fn split_row(line: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() == 2 {
        return Some((parts[0], parts[1].trim()));
    }

    let mut columns = line.split_whitespace();
    let token = columns.next()?;
    let label = columns.last()?;
    Some((token, label))
}
