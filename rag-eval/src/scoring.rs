use std::collections::HashMap;

/// Scores a list of predictions against gold answers, one entry per question.
pub trait AnswerScorer: Send + Sync {
    fn metric(&self) -> &'static str;
    fn score(&self, predictions: &[&str], gold: &[Vec<String>]) -> f64;
}

/// Token-level F1 (best over gold answers), averaged and reported on a 0-100 scale.
#[derive(Debug, Default, Clone, Copy)]
pub struct F1Scorer;

impl AnswerScorer for F1Scorer {
    fn metric(&self) -> &'static str {
        "F1"
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, predictions: &[&str], gold: &[Vec<String>]) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        let total: f64 = predictions
            .iter()
            .zip(gold)
            .map(|(prediction, answers)| {
                answers
                    .iter()
                    .map(|answer| token_f1(prediction, answer))
                    .fold(0.0, f64::max)
            })
            .sum();
        (100.0 * total / predictions.len() as f64 * 100.0).round() / 100.0
    }
}

fn normalize(text: &str) -> Vec<String> {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    lowered
        .split_whitespace()
        .filter(|token| !matches!(*token, "a" | "an" | "the"))
        .map(str::to_owned)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn token_f1(prediction: &str, answer: &str) -> f64 {
    let predicted = normalize(prediction);
    let expected = normalize(answer);
    if predicted.is_empty() || expected.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &expected {
        *counts.entry(token.as_str()).or_default() += 1;
    }
    let mut common = 0usize;
    for token in &predicted {
        if let Some(count) = counts.get_mut(token.as_str()) {
            if *count > 0 {
                *count -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }

    let precision = common as f64 / predicted.len() as f64;
    let recall = common as f64 / expected.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold(answers: &[&[&str]]) -> Vec<Vec<String>> {
        answers
            .iter()
            .map(|set| set.iter().map(|a| (*a).to_string()).collect())
            .collect()
    }

    #[test]
    fn normalisation_ignores_case_punctuation_and_articles() {
        assert!((token_f1("The Eiffel Tower!", "eiffel tower") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn partial_overlap_scores_harmonic_mean() {
        // precision 1/2, recall 1/1
        let f1 = token_f1("Paris France", "Paris");
        assert!((f1 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn best_gold_answer_counts_and_empty_predictions_score_zero() {
        let scorer = F1Scorer;
        let score = scorer.score(
            &["William Shakespeare", ""],
            &gold(&[&["Shakespeare", "William Shakespeare"], &["Paris"]]),
        );
        assert!((score - 50.0).abs() < 1e-9);
        assert!(scorer.score(&[], &[]).abs() < 1e-9);
    }
}
