use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use retrieval_pipeline::{
    embedding::EmbeddingProvider,
    prompts::{answer_prompt, direct_answer_prompt, ANSWER_MAX_NEW_TOKENS},
    ranked_texts, CitationExtractor, Corpus, CrossEncoder, Generator, RankedChunk,
    RelevanceFilter, Reranker, RetrievedChunk, SectionAggregator, TextBudgetTruncator,
    VectorIndex, VectorRetriever,
};
use tracing::{debug, info, instrument, warn};

use crate::{cache::PredictionCache, strategy::Strategy};

/// Model and index handles for a whole run. Built once at startup and
/// borrowed by the orchestrator.
pub struct RunResources {
    pub corpus: Corpus,
    pub index: Box<dyn VectorIndex>,
    pub embedder: EmbeddingProvider,
    pub encoder: Arc<dyn CrossEncoder>,
    pub truncator: TextBudgetTruncator,
    /// Writes the final answer for every strategy.
    pub answerer: Generator,
    /// Runs filtering and extraction.
    pub long_context: Generator,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub strategies: Vec<Strategy>,
    pub top_k1: usize,
    pub top_k2: usize,
    pub max_clients: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPrediction {
    pub strategy: Strategy,
    pub answer: String,
    pub prompt_len: Option<usize>,
    pub cached: bool,
}

/// Everything produced for one question.
#[derive(Debug, Clone, Default)]
pub struct QuestionOutcome {
    pub question: String,
    pub retrieved: Vec<RetrievedChunk>,
    pub ranked: Vec<RankedChunk>,
    pub unique_parents: usize,
    pub predictions: Vec<StrategyPrediction>,
    pub error: Option<String>,
}

impl QuestionOutcome {
    /// Outcome for a question whose retrieval failed: every enabled strategy
    /// gets an empty answer and no length.
    pub fn failed(question: &str, strategies: &[Strategy], error: String) -> Self {
        Self {
            question: question.to_owned(),
            predictions: strategies
                .iter()
                .map(|strategy| StrategyPrediction {
                    strategy: *strategy,
                    answer: String::new(),
                    prompt_len: None,
                    cached: false,
                })
                .collect(),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Answer for `strategy`; empty when the strategy is disabled or failed.
    pub fn answer(&self, strategy: Strategy) -> &str {
        self.prediction(strategy)
            .map_or("", |prediction| prediction.answer.as_str())
    }

    pub fn prompt_len(&self, strategy: Strategy) -> Option<usize> {
        self.prediction(strategy)
            .and_then(|prediction| prediction.prompt_len)
    }

    /// Prompt length per strategy label, for the strategies that recorded one.
    pub fn doc_len(&self) -> BTreeMap<&'static str, usize> {
        self.predictions
            .iter()
            .filter_map(|p| p.prompt_len.map(|len| (p.strategy.label(), len)))
            .collect()
    }

    fn prediction(&self, strategy: Strategy) -> Option<&StrategyPrediction> {
        self.predictions.iter().find(|p| p.strategy == strategy)
    }
}

/// Retrieval output shared by every strategy of one question, plus the filter
/// and extractor results, each computed at most once.
#[derive(Default)]
struct Evidence {
    ranked: Vec<RankedChunk>,
    passages: Vec<String>,
    filtered: Option<Vec<String>>,
    extracted: Option<Vec<String>>,
}

pub struct StrategyOrchestrator<'a> {
    retriever: VectorRetriever<'a>,
    reranker: Reranker<'a>,
    aggregator: SectionAggregator<'a>,
    filter: RelevanceFilter,
    extractor: CitationExtractor,
    answerer: &'a Generator,
    cache: &'a PredictionCache,
    settings: OrchestratorSettings,
}

impl<'a> StrategyOrchestrator<'a> {
    pub fn new(
        resources: &'a RunResources,
        cache: &'a PredictionCache,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            retriever: VectorRetriever::new(
                resources.index.as_ref(),
                &resources.embedder,
                &resources.corpus,
            ),
            reranker: Reranker::new(resources.encoder.as_ref()),
            aggregator: SectionAggregator::new(&resources.corpus, &resources.truncator),
            filter: RelevanceFilter::new(resources.long_context.clone(), settings.max_clients),
            extractor: CitationExtractor::new(resources.long_context.clone()),
            answerer: &resources.answerer,
            cache,
            settings,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.settings.strategies
    }

    /// Resolves every enabled strategy for `question`, in order.
    ///
    /// Retrieval, reranking and cache read errors are returned; generation
    /// failures only empty the affected strategy's answer.
    #[instrument(skip_all)]
    pub async fn answer(&self, question: &str) -> Result<QuestionOutcome> {
        info!(question, "Question");
        let mut outcome = QuestionOutcome {
            question: question.to_owned(),
            ..QuestionOutcome::default()
        };

        let mut evidence = Evidence::default();
        if self.settings.strategies.iter().any(|s| s.uses_retrieval()) {
            outcome.retrieved = self.retriever.retrieve(question, self.settings.top_k1).await?;
            evidence.ranked = self
                .reranker
                .rerank(question, outcome.retrieved.clone(), self.settings.top_k2)
                .await?;
            evidence.passages = ranked_texts(&evidence.ranked);
            // Only the long-document strategy depends on parent lookups succeeding.
            match self.aggregator.reduce_to_unique_parents(&evidence.ranked) {
                Ok(parents) => outcome.unique_parents = parents.len(),
                Err(err) if !self.settings.strategies.contains(&Strategy::LongDoc) => {
                    warn!(error = %err, "Could not resolve parent documents");
                }
                Err(err) => return Err(err.into()),
            }
            debug!(
                retrieved = outcome.retrieved.len(),
                ranked = evidence.ranked.len(),
                unique_parents = outcome.unique_parents,
                "Retrieved evidence"
            );
        }

        for strategy in &self.settings.strategies {
            let prediction = self.resolve(*strategy, question, &mut evidence).await?;
            outcome.predictions.push(prediction);
        }
        outcome.ranked = evidence.ranked;
        Ok(outcome)
    }

    async fn resolve(
        &self,
        strategy: Strategy,
        question: &str,
        evidence: &mut Evidence,
    ) -> Result<StrategyPrediction> {
        if let Some(hit) = self.cache.lookup(strategy, question).await? {
            debug!(strategy = strategy.label(), "Cache hit");
            return Ok(StrategyPrediction {
                strategy,
                answer: hit.answer,
                prompt_len: hit.prompt_len,
                cached: true,
            });
        }

        let prompt = self.build_prompt(strategy, question, evidence).await?;
        let generation = self.answerer.generate(&prompt, ANSWER_MAX_NEW_TOKENS).await;
        let Some(answer) = generation.text else {
            warn!(strategy = strategy.label(), "Prediction unavailable");
            return Ok(StrategyPrediction {
                strategy,
                answer: String::new(),
                prompt_len: None,
                cached: false,
            });
        };

        if let Err(err) = self
            .cache
            .store(strategy, question, &answer, generation.prompt_len)
            .await
        {
            warn!(strategy = strategy.label(), error = %err, "Failed to cache prediction");
        }
        Ok(StrategyPrediction {
            strategy,
            answer,
            prompt_len: generation.prompt_len,
            cached: false,
        })
    }

    async fn build_prompt(
        &self,
        strategy: Strategy,
        question: &str,
        evidence: &mut Evidence,
    ) -> Result<String> {
        if strategy.needs_filter() && evidence.filtered.is_none() {
            evidence.filtered = Some(self.filter.filter(question, &evidence.passages).await);
        }
        if strategy.needs_extractor() && evidence.extracted.is_none() {
            evidence.extracted = Some(
                self.extractor
                    .extract(question, &evidence.ranked, &self.aggregator)
                    .await?,
            );
        }

        let filtered = evidence.filtered.as_deref().unwrap_or_default();
        let extracted = evidence.extracted.as_deref().unwrap_or_default();
        let content = match strategy {
            Strategy::Raw => return Ok(direct_answer_prompt(question)),
            Strategy::Baseline => evidence.passages.concat(),
            Strategy::Extractor => [evidence.passages.as_slice(), extracted].concat().concat(),
            Strategy::Filter => filtered.concat(),
            Strategy::ExtractorFilter => [filtered, extracted].concat().concat(),
            Strategy::LongDoc => self
                .aggregator
                .expand_to_parent_or_chunk(&evidence.ranked, self.answerer.max_len())?
                .into_iter()
                .map(|expanded| expanded.content)
                .collect(),
        };
        Ok(answer_prompt(&content, question))
    }
}
