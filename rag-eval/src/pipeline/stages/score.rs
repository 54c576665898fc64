use std::time::Instant;

use chrono::Utc;
use tracing::info;

use crate::{
    report::{summarize_strategies, RunSummary},
    scoring::{AnswerScorer, F1Scorer},
};

use super::super::{
    context::{RunContext, RunStage},
    state::{QuestionsAnswered, RunMachine, Scored},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn score(
    machine: RunMachine<(), QuestionsAnswered>,
    ctx: &mut RunContext<'_>,
) -> StageResult<Scored> {
    let stage = RunStage::Score;
    info!(evaluation_stage = stage.label(), "starting evaluation stage");
    let started = Instant::now();

    let config = ctx.config();
    let scorer = F1Scorer;
    let strategies = summarize_strategies(
        &config.enabled_strategies(),
        &ctx.questions,
        &ctx.outcomes,
        &scorer,
    );
    for summary in &strategies {
        info!(
            strategy = summary.label,
            score = summary.score,
            avg_prompt_len = summary.avg_prompt_len,
            answered = summary.answered,
            "Strategy scored"
        );
    }

    ctx.summary = Some(RunSummary {
        generated_at: Utc::now(),
        dataset: config.dataset.id().to_string(),
        model: config.model.clone(),
        long_context_model: config.long_context_model().to_string(),
        top_k1: config.top_k1,
        top_k2: config.top_k2,
        metric: scorer.metric(),
        questions: ctx.outcomes.len(),
        failed_questions: ctx.outcomes.iter().filter(|o| o.error.is_some()).count(),
        strategies,
    });

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .score()
        .map_err(|(_, guard)| map_guard_error("score", guard))
}
