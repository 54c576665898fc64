use common::error::AppError;
use tracing::{instrument, warn};

use crate::{
    aggregation::SectionAggregator,
    generation::Generator,
    prompts::{extraction_prompt, EXTRACTION_MAX_NEW_TOKENS},
    RankedChunk,
};

/// Asks a model to pull out what it needs to cite, reading full parent
/// documents where they fit its context.
pub struct CitationExtractor {
    generator: Generator,
}

impl CitationExtractor {
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Always returns exactly one string; a failed generation yields `""`.
    ///
    /// Only aggregation errors (an unknown chunk or parent) are returned.
    #[instrument(skip_all, fields(ranked = ranked.len()))]
    pub async fn extract(
        &self,
        question: &str,
        ranked: &[RankedChunk],
        aggregator: &SectionAggregator<'_>,
    ) -> Result<Vec<String>, AppError> {
        let documents: Vec<String> = aggregator
            .expand_to_parent_or_chunk(ranked, self.generator.max_len())?
            .into_iter()
            .map(|expanded| expanded.content)
            .collect();

        let generation = self
            .generator
            .generate(&extraction_prompt(&documents, question), EXTRACTION_MAX_NEW_TOKENS)
            .await;
        let extracted = generation.text.unwrap_or_else(|| {
            warn!("Citation extraction unavailable");
            String::new()
        });
        Ok(vec![extracted])
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;
    use crate::{
        corpus::Corpus,
        testing::{generator_for, word_truncator, ScriptedBackend},
    };

    fn corpus() -> Corpus {
        Corpus::new(
            vec!["chunk-a".into(), "chunk-b".into()],
            HashMap::from([(0, "doc".to_string()), (1, "doc".to_string())]),
            HashMap::from([("doc".to_string(), "full parent text".to_string())]),
        )
    }

    fn ranked() -> Vec<RankedChunk> {
        vec![
            RankedChunk {
                chunk_id: 1,
                text: "chunk-b".into(),
                score: 0.9,
            },
            RankedChunk {
                chunk_id: 0,
                text: "chunk-a".into(),
                score: 0.5,
            },
        ]
    }

    #[tokio::test]
    async fn extracts_from_expanded_parents() {
        let corpus = corpus();
        let truncator = word_truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);
        let backend = Arc::new(ScriptedBackend::constant("Paris is the capital."));
        let extractor = CitationExtractor::new(generator_for(backend.clone(), 1000));

        let out = extractor
            .extract("Capital of France?", &ranked(), &aggregator)
            .await
            .expect("extract");
        assert_eq!(out, vec!["Paris is the capital.".to_string()]);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.starts_with("full parent text.\n\n"));
        assert!(!calls[0].0.contains("chunk-b"));
        assert_eq!(calls[0].1, EXTRACTION_MAX_NEW_TOKENS);
    }

    #[tokio::test]
    async fn failed_generation_yields_single_empty_string() {
        let corpus = corpus();
        let truncator = word_truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);
        let extractor = CitationExtractor::new(generator_for(Arc::new(ScriptedBackend::failing()), 1000));

        let out = extractor
            .extract("q", &ranked(), &aggregator)
            .await
            .expect("extract");
        assert_eq!(out, vec![String::new()]);
    }
}
