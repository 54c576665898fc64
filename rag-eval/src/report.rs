use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    datasets::EvalQuestion, orchestrator::QuestionOutcome, scoring::AnswerScorer,
    strategy::Strategy,
};

#[derive(Debug, Clone, Serialize)]
pub struct StrategySummary {
    pub strategy: Strategy,
    pub label: &'static str,
    pub score: f64,
    pub avg_prompt_len: f64,
    pub answered: usize,
    pub cached: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub dataset: String,
    pub model: String,
    pub long_context_model: String,
    pub top_k1: usize,
    pub top_k2: usize,
    pub metric: &'static str,
    pub questions: usize,
    pub failed_questions: usize,
    pub strategies: Vec<StrategySummary>,
}

pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
    pub predictions: PathBuf,
}

/// Scores every enabled strategy and averages its prompt length over all
/// questions; a question without a recorded length counts as zero.
#[allow(clippy::cast_precision_loss)]
pub fn summarize_strategies(
    strategies: &[Strategy],
    questions: &[EvalQuestion],
    outcomes: &[QuestionOutcome],
    scorer: &dyn AnswerScorer,
) -> Vec<StrategySummary> {
    let gold: Vec<Vec<String>> = questions.iter().map(|q| q.answers.clone()).collect();
    let count = outcomes.len().max(1) as f64;

    strategies
        .iter()
        .map(|strategy| {
            let predictions: Vec<&str> = outcomes.iter().map(|o| o.answer(*strategy)).collect();
            let total_len: usize = outcomes
                .iter()
                .filter_map(|o| o.prompt_len(*strategy))
                .sum();
            let (answered, cached) = outcomes
                .iter()
                .flat_map(|o| o.predictions.iter())
                .filter(|p| p.strategy == *strategy && !p.answer.is_empty())
                .fold((0, 0), |(answered, cached), p| {
                    (answered + 1, cached + usize::from(p.cached))
                });
            StrategySummary {
                strategy: *strategy,
                label: strategy.label(),
                score: scorer.score(&predictions, &gold),
                avg_prompt_len: total_len as f64 / count,
                answered,
                cached,
            }
        })
        .collect()
}

#[derive(Serialize)]
struct EvalResult<'a> {
    #[serde(rename = "F1")]
    scores: BTreeMap<&'a str, f64>,
    doc_len: BTreeMap<&'a str, f64>,
}

#[derive(Serialize)]
struct PredictionLine<'a> {
    question: &'a str,
    gold: &'a [String],
    retrieved: Vec<usize>,
    ranked: Vec<usize>,
    unique_parents: usize,
    answers: BTreeMap<&'static str, &'a str>,
    doc_len: BTreeMap<&'static str, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

pub fn write_reports(
    summary: &RunSummary,
    questions: &[EvalQuestion],
    outcomes: &[QuestionOutcome],
    output_dir: &Path,
) -> Result<ReportPaths> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let result = EvalResult {
        scores: summary
            .strategies
            .iter()
            .map(|s| (s.label, s.score))
            .collect(),
        doc_len: summary
            .strategies
            .iter()
            .map(|s| (s.label, s.avg_prompt_len))
            .collect(),
    };
    let json_path = output_dir.join("eval_result.json");
    let json_blob = serde_json::to_string_pretty(&result).context("serialising eval result")?;
    fs::write(&json_path, json_blob)
        .with_context(|| format!("writing eval result to {}", json_path.display()))?;

    let md_path = output_dir.join("eval_result.md");
    fs::write(&md_path, render_markdown(summary))
        .with_context(|| format!("writing Markdown report to {}", md_path.display()))?;

    let predictions_path = output_dir.join("predictions.jsonl");
    let mut lines = String::new();
    for (question, outcome) in questions.iter().zip(outcomes) {
        let line = PredictionLine {
            question: &outcome.question,
            gold: &question.answers,
            retrieved: outcome.retrieved.iter().map(|c| c.chunk_id).collect(),
            ranked: outcome.ranked.iter().map(|c| c.chunk_id).collect(),
            unique_parents: outcome.unique_parents,
            answers: outcome
                .predictions
                .iter()
                .map(|p| (p.strategy.label(), p.answer.as_str()))
                .collect(),
            doc_len: outcome.doc_len(),
            error: outcome.error.as_deref(),
        };
        lines.push_str(&serde_json::to_string(&line).context("serialising prediction line")?);
        lines.push('\n');
    }
    fs::write(&predictions_path, lines)
        .with_context(|| format!("writing predictions to {}", predictions_path.display()))?;

    Ok(ReportPaths {
        json: json_path,
        markdown: md_path,
        predictions: predictions_path,
    })
}

fn render_markdown(summary: &RunSummary) -> String {
    let mut md = String::new();

    let _ = writeln!(md, "# Evaluation: {}\n", summary.dataset);
    md.push_str("| Setting | Value |\n| --- | --- |\n");
    let _ = writeln!(md, "| Generated | {} |", summary.generated_at.to_rfc3339());
    let _ = writeln!(md, "| Model | `{}` |", summary.model);
    let _ = writeln!(md, "| Long-context model | `{}` |", summary.long_context_model);
    let _ = writeln!(md, "| Top-K1 / Top-K2 | {} / {} |", summary.top_k1, summary.top_k2);
    let _ = writeln!(md, "| Questions | {} |", summary.questions);
    let _ = writeln!(md, "| Failed questions | {} |", summary.failed_questions);

    md.push_str("\n## Strategies\n\n");
    let _ = writeln!(
        md,
        "| Strategy | {} | Avg prompt tokens | Answered | From cache |",
        summary.metric
    );
    md.push_str("| --- | --- | --- | --- | --- |\n");
    for strategy in &summary.strategies {
        let _ = writeln!(
            md,
            "| {} | {:.2} | {:.1} | {} | {} |",
            strategy.label, strategy.score, strategy.avg_prompt_len, strategy.answered, strategy.cached
        );
    }
    md
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{orchestrator::StrategyPrediction, scoring::F1Scorer};

    fn outcome(question: &str, answer: &str, prompt_len: Option<usize>) -> QuestionOutcome {
        QuestionOutcome {
            question: question.into(),
            predictions: vec![StrategyPrediction {
                strategy: Strategy::Baseline,
                answer: answer.into(),
                prompt_len,
                cached: false,
            }],
            ..QuestionOutcome::default()
        }
    }

    fn questions() -> Vec<EvalQuestion> {
        vec![
            EvalQuestion {
                question: "q1".into(),
                answers: vec!["Paris".into()],
            },
            EvalQuestion {
                question: "q2".into(),
                answers: vec!["Berlin".into()],
            },
        ]
    }

    #[test]
    fn averages_count_missing_lengths_as_zero() {
        let outcomes = vec![outcome("q1", "Paris", Some(300)), outcome("q2", "", None)];
        let summary = summarize_strategies(&[Strategy::Baseline], &questions(), &outcomes, &F1Scorer);

        assert_eq!(summary.len(), 1);
        assert!((summary[0].score - 50.0).abs() < 1e-9);
        assert!((summary[0].avg_prompt_len - 150.0).abs() < 1e-9);
        assert_eq!(summary[0].answered, 1);
    }

    #[test]
    fn writes_result_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let questions = questions();
        let outcomes = vec![outcome("q1", "Paris", Some(300)), outcome("q2", "Bonn", Some(100))];
        let summary = RunSummary {
            generated_at: Utc::now(),
            dataset: "hotpotqa".into(),
            model: "gpt-4o-mini".into(),
            long_context_model: "gpt-4o-mini".into(),
            top_k1: 100,
            top_k2: 7,
            metric: "F1",
            questions: 2,
            failed_questions: 0,
            strategies: summarize_strategies(&[Strategy::Baseline], &questions, &outcomes, &F1Scorer),
        };

        let paths = write_reports(&summary, &questions, &outcomes, dir.path()).expect("write");

        let result: Value =
            serde_json::from_str(&fs::read_to_string(&paths.json).expect("read")).expect("json");
        assert_eq!(result["F1"]["R&B"], 50.0);
        assert_eq!(result["doc_len"]["R&B"], 200.0);

        let markdown = fs::read_to_string(&paths.markdown).expect("read");
        assert!(markdown.contains("| R&B | 50.00 | 200.0 | 2 | 0 |"));

        let predictions = fs::read_to_string(&paths.predictions).expect("read");
        assert_eq!(predictions.lines().count(), 2);
        let first: Value = serde_json::from_str(predictions.lines().next().expect("line")).expect("json");
        assert_eq!(first["answers"]["R&B"], "Paris");
        assert_eq!(first["doc_len"]["R&B"], 300);
    }
}
