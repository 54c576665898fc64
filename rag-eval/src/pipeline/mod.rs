mod context;
mod stages;
mod state;

use anyhow::Result;
use common::utils::config::AppConfig;

use crate::{
    args::Config,
    report::{ReportPaths, RunSummary},
};

use context::RunContext;

pub async fn run_evaluation(
    config: &Config,
    app_config: &AppConfig,
) -> Result<(RunSummary, ReportPaths)> {
    let mut ctx = RunContext::new(config, app_config);
    let machine = state::ready();

    let machine = stages::load_resources(machine, &mut ctx).await?;
    let machine = stages::answer_questions(machine, &mut ctx).await?;
    let machine = stages::score(machine, &mut ctx).await?;
    let machine = stages::finalize(machine, &mut ctx).await?;

    drop(machine);

    ctx.into_output()
}
