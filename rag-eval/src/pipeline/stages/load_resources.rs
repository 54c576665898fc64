use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use common::utils::config::AppConfig;
use retrieval_pipeline::{
    embedding::build_provider,
    generation::build_backend,
    reranking::RerankerPool,
    truncation::load_reference_tokenizer,
    Corpus, CrossEncoder, FlatIndex, Generator, RetryPolicy, TextBudgetTruncator,
};
use tracing::info;

use crate::{
    datasets::{load_questions, questions_path, raw_corpus_path},
    orchestrator::RunResources,
};

use super::super::{
    context::{RunContext, RunStage},
    state::{Ready, ResourcesLoaded, RunMachine},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn load_resources(
    machine: RunMachine<(), Ready>,
    ctx: &mut RunContext<'_>,
) -> StageResult<ResourcesLoaded> {
    let stage = RunStage::LoadResources;
    info!(evaluation_stage = stage.label(), "starting evaluation stage");
    let started = Instant::now();

    let config = ctx.config();
    let app_config = ctx.app_config();
    let data_dir = ctx.data_dir();
    let store_dir = config.store_dir();

    let raw_path = raw_corpus_path(&data_dir, config.dataset);
    let corpus = Corpus::load(&store_dir, &raw_path).with_context(|| {
        format!(
            "loading corpus from {} and {}",
            store_dir.display(),
            raw_path.display()
        )
    })?;

    let questions_file = questions_path(&data_dir, config.dataset);
    ctx.questions = load_questions(&questions_file, config.limit)?;
    info!(
        dataset = config.dataset.label(),
        questions = ctx.questions.len(),
        chunks = corpus.chunks().len(),
        "Dataset ready"
    );

    let embedder = build_provider(app_config)
        .await
        .context("initialising embedding provider")?;
    let index_path = store_dir.join("vector_index.json");
    let index = FlatIndex::load_or_build(&index_path, &corpus, &embedder)
        .await
        .with_context(|| format!("preparing vector index {}", index_path.display()))?;
    info!(
        backend = embedder.backend_label(),
        model = %embedder.model_code().unwrap_or_default(),
        dimension = embedder.dimension(),
        "Embedding provider ready"
    );

    let encoder: Arc<dyn CrossEncoder> =
        RerankerPool::from_config(app_config).context("initialising reranker pool")?;

    let tokenizer_name = app_config.reference_tokenizer.clone();
    let tokenizer = tokio::task::spawn_blocking(move || load_reference_tokenizer(&tokenizer_name))
        .await?
        .with_context(|| format!("loading reference tokenizer {}", app_config.reference_tokenizer))?;
    let truncator = TextBudgetTruncator::new(Arc::new(tokenizer));

    let retry = RetryPolicy::backoff(Duration::from_secs(app_config.retry_max_time_secs));
    let answerer = build_generator(app_config, &config.model, &truncator, retry)?;
    let long_context_name = config.long_context_model();
    let long_context = if long_context_name.eq_ignore_ascii_case(&config.model) {
        answerer.clone()
    } else {
        build_generator(app_config, long_context_name, &truncator, retry)?
    };

    ctx.resources = Some(RunResources {
        corpus,
        index: Box::new(index),
        embedder,
        encoder,
        truncator,
        answerer,
        long_context,
    });

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .load_resources()
        .map_err(|(_, guard)| map_guard_error("load_resources", guard))
}

fn build_generator(
    app_config: &AppConfig,
    name: &str,
    truncator: &TextBudgetTruncator,
    retry: RetryPolicy,
) -> Result<Generator> {
    let spec = app_config
        .model(name)
        .with_context(|| format!("resolving model '{name}'"))?;
    let backend = build_backend(name, spec).with_context(|| format!("building backend for '{name}'"))?;
    Ok(Generator::from_spec(backend, truncator.clone(), spec, retry))
}
