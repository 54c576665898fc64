use std::time::Instant;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::report::write_reports;

use super::super::{
    context::{RunContext, RunStage},
    state::{Completed, RunMachine, Scored},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn finalize(
    machine: RunMachine<(), Scored>,
    ctx: &mut RunContext<'_>,
) -> StageResult<Completed> {
    let stage = RunStage::Finalize;
    info!(evaluation_stage = stage.label(), "starting evaluation stage");
    let started = Instant::now();

    let output_dir = &ctx.config().output_dir;
    let summary = ctx
        .summary
        .as_ref()
        .ok_or_else(|| anyhow!("run has not been scored"))?;
    let paths = write_reports(summary, &ctx.questions, &ctx.outcomes, output_dir)
        .with_context(|| format!("writing reports to {}", output_dir.display()))?;
    info!(
        json = %paths.json.display(),
        markdown = %paths.markdown.display(),
        predictions = %paths.predictions.display(),
        "Reports written"
    );
    ctx.report = Some(paths);

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        stage_timings = ?ctx.stage_timings,
        "completed evaluation stage"
    );

    machine
        .finalize()
        .map_err(|(_, guard)| map_guard_error("finalize", guard))
}
