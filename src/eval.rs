//! Answer-quality metrics for question answering over retrieved context.

use std::{collections::HashSet, hash::Hash};

use serde::Serialize;

/// 1.0 when the answers match after trimming and lowercasing, else 0.0.
pub fn exact_match(predicted: &str, gold: &str) -> f64 {
    if predicted.trim().to_lowercase() == gold.trim().to_lowercase() {
        1.0
    } else {
        0.0
    }
}

/// Harmonic mean of token-set precision and recall.
///
/// Duplicate tokens count once. Either side empty scores 0.0.
pub fn f1<T: Eq + Hash>(predicted: &[T], gold: &[T]) -> f64 {
    let predicted: HashSet<&T> = predicted.iter().collect();
    let gold: HashSet<&T> = gold.iter().collect();
    if predicted.is_empty() || gold.is_empty() {
        return 0.0;
    }

    let common = predicted.intersection(&gold).count() as f64;
    let precision = common / predicted.len() as f64;
    let recall = common / gold.len() as f64;
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

/// Lowercased whitespace tokens.
pub fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AnswerScore {
    pub exact_match: f64,
    pub f1: f64,
}

/// Score one predicted answer against its reference.
pub fn score_answer(predicted: &str, gold: &str) -> AnswerScore {
    AnswerScore {
        exact_match: exact_match(predicted, gold),
        f1: f1(&tokens(predicted), &tokens(gold)),
    }
}

/// Mean scores over `(predicted, gold)` pairs. No pairs scores zero.
pub fn mean_score<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> AnswerScore {
    let mut total = AnswerScore::default();
    let mut n = 0usize;
    for (predicted, gold) in pairs {
        let score = score_answer(predicted, gold);
        total.exact_match += score.exact_match;
        total.f1 += score.f1;
        n += 1;
    }
    if n == 0 {
        return total;
    }
    AnswerScore {
        exact_match: total.exact_match / n as f64,
        f1: total.f1 / n as f64,
    }
}
