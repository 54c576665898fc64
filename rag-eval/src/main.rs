mod args;
mod cache;
mod datasets;
mod orchestrator;
mod pipeline;
mod report;
mod scoring;
mod strategy;

use std::{fs, path::Path, sync::Arc};

use anyhow::Context;
use common::utils::config::get_config;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    let parsed = args::parse()?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(std::thread::available_parallelism()?.get())
        .thread_name("rag-eval-worker")
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async_main(parsed.config))
}

/// Console output plus a plain-text `log` file in the run's output directory.
fn init_logging(output_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;
    let log_path = output_dir.join("log");
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .try_init()
        .ok();
    Ok(())
}

async fn async_main(config: args::Config) -> anyhow::Result<()> {
    init_logging(&config.output_dir)?;
    config.log_configuration();

    let app_config = get_config(config.config.as_deref()).context("loading model registry")?;
    info!(
        models = app_config.models.len(),
        reference_tokenizer = %app_config.reference_tokenizer,
        "Model registry loaded"
    );

    let (summary, paths) = pipeline::run_evaluation(&config, &app_config)
        .await
        .context("running evaluation")?;

    let scores = summary
        .strategies
        .iter()
        .map(|s| format!("{} {:.2} (avg {:.0} tokens)", s.label, s.score, s.avg_prompt_len))
        .collect::<Vec<_>>()
        .join(" | ");
    println!(
        "[{}] {} over {} questions: {scores} → JSON: {} | Markdown: {} | Predictions: {}",
        summary.dataset,
        summary.metric,
        summary.questions,
        paths.json.display(),
        paths.markdown.display(),
        paths.predictions.display(),
    );

    Ok(())
}
