use futures::{stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    generation::{Generation, Generator},
    prompts::{reasoning_prompt, verdict_prompt, REASONING_MAX_NEW_TOKENS, VERDICT_MAX_NEW_TOKENS},
};

/// Keeps the passages a model says it must cite, judged against its own
/// reasoning chain for the question.
pub struct RelevanceFilter {
    generator: Generator,
    max_clients: usize,
}

impl RelevanceFilter {
    /// `max_clients` bounds the verdict calls in flight at once.
    pub fn new(generator: Generator, max_clients: usize) -> Self {
        Self {
            generator,
            max_clients: max_clients.max(1),
        }
    }

    /// Returns the cited subset of `passages` in input order, or every passage
    /// when nothing is cited. Never returns an empty list for non-empty input.
    #[instrument(skip_all, fields(passages = passages.len()))]
    pub async fn filter(&self, question: &str, passages: &[String]) -> Vec<String> {
        if passages.is_empty() {
            return Vec::new();
        }

        let reasoning = self
            .generator
            .generate(&reasoning_prompt(passages, question), REASONING_MAX_NEW_TOKENS)
            .await
            .text
            .unwrap_or_else(|| {
                warn!("Reasoning chain unavailable; judging passages without it");
                String::new()
            });

        let verdicts = self.collect_verdicts(question, passages, &reasoning).await;

        let mut selected = Vec::new();
        if verdicts.len() == passages.len() {
            for (passage, verdict) in passages.iter().zip(&verdicts) {
                if verdict.text.as_deref().is_some_and(is_cited) {
                    selected.push(passage.clone());
                }
            }
        } else {
            warn!(
                responses = verdicts.len(),
                passages = passages.len(),
                "Verdict count mismatch; skipping selection"
            );
        }

        if selected.is_empty() {
            debug!("No passage selected; keeping all");
            return passages.to_vec();
        }
        info!(selected = selected.len(), "Filtered passages");
        selected
    }

    async fn collect_verdicts(
        &self,
        question: &str,
        passages: &[String],
        reasoning: &str,
    ) -> Vec<Generation> {
        let tasks = passages.iter().map(|passage| {
            let generator = self.generator.clone();
            let prompt = verdict_prompt(passage, question, reasoning);
            tokio::spawn(async move { generator.generate(&prompt, VERDICT_MAX_NEW_TOKENS).await })
        });

        stream::iter(tasks)
            .buffered(self.max_clients)
            .filter_map(|joined| async move {
                joined
                    .inspect_err(|err| warn!(error = %err, "Verdict task did not complete"))
                    .ok()
            })
            .collect()
            .await
    }
}

/// Reads `{"status": ...}` case-insensitively; any response that is not a JSON
/// object with a status falls back to looking for a literal `true`/`True`.
fn is_cited(response: &str) -> bool {
    match serde_json::from_str::<Value>(response) {
        Ok(value) => match value.get("status") {
            Some(Value::String(status)) => status.eq_ignore_ascii_case("true"),
            Some(Value::Bool(status)) => *status,
            _ => mentions_true(response),
        },
        Err(_) => mentions_true(response),
    }
}

fn mentions_true(response: &str) -> bool {
    response.contains("True") || response.contains("true")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{generator_for, ScriptedBackend};

    fn passages() -> Vec<String> {
        vec![
            "Paris is in France.".to_string(),
            "Bananas are yellow.".to_string(),
            "The Eiffel Tower is in Paris.".to_string(),
        ]
    }

    fn verdicts_by_passage(
        responses: [&'static str; 3],
    ) -> impl Fn(&str) -> Result<String, common::error::AppError> + Send + Sync + 'static {
        move |prompt: &str| {
            if prompt.starts_with("Given an article:Paris") {
                Ok(responses[0].to_string())
            } else if prompt.starts_with("Given an article:Bananas") {
                Ok(responses[1].to_string())
            } else if prompt.starts_with("Given an article:The Eiffel") {
                Ok(responses[2].to_string())
            } else {
                Ok("Both Paris passages matter.".to_string())
            }
        }
    }

    #[tokio::test]
    async fn mixed_verdicts_use_json_then_substring_fallback() {
        let backend = Arc::new(ScriptedBackend::new(verdicts_by_passage([
            r#"{"status":"True"}"#,
            r#"{"status":"false"}"#,
            "that is a true story",
        ])));
        let filter = RelevanceFilter::new(generator_for(backend.clone(), 10_000), 2);

        let selected = filter.filter("Where is the Eiffel Tower?", &passages()).await;
        assert_eq!(
            selected,
            vec![
                "Paris is in France.".to_string(),
                "The Eiffel Tower is in Paris.".to_string()
            ]
        );

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].0.starts_with("Paris is in France.\nBananas"));
        assert_eq!(calls[0].1, REASONING_MAX_NEW_TOKENS);
        assert!(calls[1..].iter().all(|(prompt, budget)| {
            *budget == VERDICT_MAX_NEW_TOKENS
                && prompt.contains("Thought process:Both Paris passages matter..")
        }));
    }

    #[tokio::test]
    async fn nothing_selected_returns_every_passage() {
        let backend = Arc::new(ScriptedBackend::new(verdicts_by_passage([
            r#"{"status":"false"}"#,
            r#"{"status": false}"#,
            "no",
        ])));
        let filter = RelevanceFilter::new(generator_for(backend, 10_000), 1);

        let selected = filter.filter("q", &passages()).await;
        assert_eq!(selected, passages());
    }

    #[tokio::test]
    async fn lost_verdict_task_discards_every_selection() {
        let backend = Arc::new(ScriptedBackend::new(|prompt: &str| {
            if prompt.starts_with("Given an article:Paris") {
                Ok(r#"{"status":"true"}"#.to_string())
            } else if prompt.starts_with("Given an article:Bananas") {
                panic!("verdict worker crashed");
            } else if prompt.starts_with("Given an article:The Eiffel") {
                Ok(r#"{"status":"false"}"#.to_string())
            } else {
                Ok("Only the first passage matters.".to_string())
            }
        }));
        let filter = RelevanceFilter::new(generator_for(backend.clone(), 10_000), 2);

        let selected = filter.filter("Where is Paris?", &passages()).await;
        assert_eq!(selected, passages());
        assert_eq!(backend.calls().len(), 4);
    }

    #[tokio::test]
    async fn failing_backend_degrades_to_all_passages() {
        let backend = Arc::new(ScriptedBackend::failing());
        let filter = RelevanceFilter::new(generator_for(backend, 10_000), 3);
        assert_eq!(filter.filter("q", &passages()).await, passages());
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let backend = Arc::new(ScriptedBackend::constant("true"));
        let filter = RelevanceFilter::new(generator_for(backend.clone(), 10_000), 3);
        assert!(filter.filter("q", &[]).await.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn verdict_parsing() {
        assert!(is_cited(r#"{"status": "TRUE"}"#));
        assert!(is_cited(r#"{"status": true}"#));
        assert!(!is_cited(r#"{"status": "False"}"#));
        assert!(is_cited(r#"{"answer": "True"}"#));
        assert!(is_cited("```json\n{\"status\": \"True\"}\n```"));
        assert!(!is_cited("I would not cite it."));
    }
}
