//! # Sequence Labeling Metrics
//!
//! Entity-level precision, recall and F1 over tag sequences, following the
//! chunking rules of the `seqeval` default (non-strict) mode. A tag is split
//! into a one-character prefix (`B`, `I`, `O`, `E`, `S`) and an entity type
//! (everything after the first `-`). An entity is the tuple
//! `(sentence, type, first token, last token)` and a prediction only counts
//! when the whole tuple matches a gold entity.

use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, SeqTagError};

/// An entity chunk inside one sentence. `end` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
}

fn split_tag(chunk: &str) -> (char, &str) {
    let Some(prefix) = chunk.chars().next() else {
        return ('O', "_");
    };
    let rest = &chunk[prefix.len_utf8()..];
    let entity_type = match rest.split_once('-') {
        Some((_, t)) => t,
        None => rest,
    };
    (prefix, if entity_type.is_empty() { "_" } else { entity_type })
}

fn end_of_chunk(prev_tag: char, tag: char, prev_type: &str, entity_type: &str) -> bool {
    match (prev_tag, tag) {
        ('E', _) | ('S', _) => true,
        ('B', 'B') | ('B', 'S') | ('B', 'O') => true,
        ('I', 'B') | ('I', 'S') | ('I', 'O') => true,
        _ => prev_tag != 'O' && prev_tag != '.' && prev_type != entity_type,
    }
}

fn start_of_chunk(prev_tag: char, tag: char, prev_type: &str, entity_type: &str) -> bool {
    match (prev_tag, tag) {
        (_, 'B') | (_, 'S') => true,
        ('E', 'E') | ('E', 'I') | ('S', 'E') | ('S', 'I') | ('O', 'E') | ('O', 'I') => true,
        _ => tag != 'O' && tag != '.' && prev_type != entity_type,
    }
}

/// Extract entity chunks from one tag sequence.
pub fn get_entities<S: AsRef<str>>(seq: &[S]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut prev_tag = 'O';
    let mut prev_type = String::from("_");
    let mut begin = 0usize;

    // A trailing "O" flushes an entity that runs to the end of the sentence.
    let tags = seq.iter().map(AsRef::as_ref).chain(std::iter::once("O"));
    for (i, chunk) in tags.enumerate() {
        let (tag, entity_type) = split_tag(chunk);

        if end_of_chunk(prev_tag, tag, &prev_type, entity_type) {
            entities.push(Entity {
                entity_type: prev_type.clone(),
                start: begin,
                end: i - 1,
            });
        }
        if start_of_chunk(prev_tag, tag, &prev_type, entity_type) {
            begin = i;
        }

        prev_tag = tag;
        prev_type = entity_type.to_string();
    }

    entities
}

/// Precision, recall and F1 of one entity type or of all of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of gold entities.
    pub support: usize,
}

impl Scores {
    /// Scores from match counts.
    ///
    /// When there is nothing to find and nothing was predicted the tagger
    /// agrees perfectly with the gold data and every score is 1.0. Any other
    /// zero denominator scores 0.0.
    pub fn from_counts(correct: usize, predicted: usize, gold: usize) -> Self {
        if predicted == 0 && gold == 0 {
            return Self {
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                support: 0,
            };
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(correct, predicted);
        let recall = ratio(correct, gold);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Self {
            precision,
            recall,
            f1,
            support: gold,
        }
    }
}

/// Everything computed at the end of an evaluation epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceReport {
    /// Micro-averaged entity scores.
    pub overall: Scores,
    /// Token-level accuracy.
    pub accuracy: f64,
    /// Scores per entity type, sorted by type name.
    pub per_type: BTreeMap<String, Scores>,
}

#[derive(Default)]
struct Counts {
    correct: usize,
    predicted: usize,
    gold: usize,
}

/// Score predicted tag sequences against gold ones.
///
/// Both sides must contain the same, non-zero number of sentences and each
/// pair of sentences the same number of tags.
pub fn evaluate<S: AsRef<str>>(gold: &[Vec<S>], pred: &[Vec<S>]) -> Result<SequenceReport> {
    if gold.len() != pred.len() {
        return Err(SeqTagError::MetricMismatch(format!(
            "{} gold sentences but {} predicted",
            gold.len(),
            pred.len()
        )));
    }
    if gold.is_empty() {
        return Err(SeqTagError::NothingToScore);
    }

    let same = |a: &S, b: &S| a.as_ref() == b.as_ref();
    let mut gold_entities = HashSet::new();
    let mut pred_entities = HashSet::new();
    let mut tokens = 0usize;
    let mut matching_tokens = 0usize;

    for (sentence, (g, p)) in gold.iter().zip(pred).enumerate() {
        if g.len() != p.len() {
            return Err(SeqTagError::MetricMismatch(format!(
                "sentence {sentence} has {} gold tags but {} predicted",
                g.len(),
                p.len()
            )));
        }
        tokens += g.len();
        matching_tokens += g.iter().zip(p).filter(|(a, b)| same(a, b)).count();

        gold_entities.extend(get_entities(g).into_iter().map(|e| (sentence, e)));
        pred_entities.extend(get_entities(p).into_iter().map(|e| (sentence, e)));
    }

    let mut by_type: BTreeMap<String, Counts> = BTreeMap::new();
    for (_, entity) in &gold_entities {
        by_type.entry(entity.entity_type.clone()).or_default().gold += 1;
    }
    for key in &pred_entities {
        let counts = by_type.entry(key.1.entity_type.clone()).or_default();
        counts.predicted += 1;
        if gold_entities.contains(key) {
            counts.correct += 1;
        }
    }

    let correct = by_type.values().map(|c| c.correct).sum();
    let overall = Scores::from_counts(correct, pred_entities.len(), gold_entities.len());
    let per_type = by_type
        .into_iter()
        .map(|(ty, c)| (ty, Scores::from_counts(c.correct, c.predicted, c.gold)))
        .collect();
    let accuracy = if tokens == 0 {
        0.0
    } else {
        matching_tokens as f64 / tokens as f64
    };

    Ok(SequenceReport {
        overall,
        accuracy,
        per_type,
    })
}

/// Per-example gold and predicted tag sequences gathered over one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSequences {
    pub gold: Vec<Vec<String>>,
    pub pred: Vec<Vec<String>>,
}

impl LabelSequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, gold: Vec<String>, pred: Vec<String>) {
        self.gold.push(gold);
        self.pred.push(pred);
    }

    pub fn len(&self) -> usize {
        self.gold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gold.is_empty()
    }

    /// Score the accumulated sequences.
    pub fn evaluate(&self) -> Result<SequenceReport> {
        evaluate(&self.gold, &self.pred)
    }
}
