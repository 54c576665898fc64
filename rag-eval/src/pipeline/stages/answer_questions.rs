use std::time::Instant;

use tracing::{error, info};

use crate::orchestrator::{OrchestratorSettings, QuestionOutcome, StrategyOrchestrator};

use super::super::{
    context::{RunContext, RunStage},
    state::{QuestionsAnswered, ResourcesLoaded, RunMachine},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn answer_questions(
    machine: RunMachine<(), ResourcesLoaded>,
    ctx: &mut RunContext<'_>,
) -> StageResult<QuestionsAnswered> {
    let stage = RunStage::AnswerQuestions;
    info!(evaluation_stage = stage.label(), "starting evaluation stage");
    let started = Instant::now();

    let config = ctx.config();
    let settings = OrchestratorSettings {
        strategies: config.enabled_strategies(),
        top_k1: config.top_k1,
        top_k2: config.top_k2,
        max_clients: config.max_clients,
    };
    let orchestrator = StrategyOrchestrator::new(ctx.resources()?, &ctx.cache, settings);

    let total = ctx.questions.len();
    let mut outcomes = Vec::with_capacity(total);
    for (index, question) in ctx.questions.iter().enumerate() {
        let outcome = match orchestrator.answer(&question.question).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(question_index = index, error = %format!("{err:#}"), "Question failed");
                QuestionOutcome::failed(
                    &question.question,
                    orchestrator.strategies(),
                    format!("{err:#}"),
                )
            }
        };
        outcomes.push(outcome);
        info!(answered = index + 1, total, "Question resolved");
    }
    ctx.outcomes = outcomes;

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .answer_questions()
        .map_err(|(_, guard)| map_guard_error("answer_questions", guard))
}
