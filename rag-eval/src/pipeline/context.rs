use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use common::utils::config::AppConfig;

use crate::{
    args::Config,
    cache::PredictionCache,
    datasets::EvalQuestion,
    orchestrator::{QuestionOutcome, RunResources},
    report::{ReportPaths, RunSummary},
};

pub(super) struct RunContext<'a> {
    config: &'a Config,
    app_config: &'a AppConfig,
    pub stage_timings: BTreeMap<&'static str, u128>,
    pub questions: Vec<EvalQuestion>,
    pub resources: Option<RunResources>,
    pub cache: PredictionCache,
    pub outcomes: Vec<QuestionOutcome>,
    pub summary: Option<RunSummary>,
    pub report: Option<ReportPaths>,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a Config, app_config: &'a AppConfig) -> Self {
        Self {
            config,
            app_config,
            stage_timings: BTreeMap::new(),
            questions: Vec::new(),
            resources: None,
            cache: PredictionCache::new(config.output_dir.clone()),
            outcomes: Vec::new(),
            summary: None,
            report: None,
        }
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn app_config(&self) -> &'a AppConfig {
        self.app_config
    }

    /// Raw corpora and evaluation sets live here.
    pub fn data_dir(&self) -> PathBuf {
        self.config
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.app_config.data_dir))
    }

    pub fn resources(&self) -> Result<&RunResources> {
        self.resources
            .as_ref()
            .ok_or_else(|| anyhow!("run resources have not been loaded"))
    }

    pub fn record_stage_duration(&mut self, stage: RunStage, duration: Duration) {
        self.stage_timings.insert(stage.label(), duration.as_millis());
    }

    pub fn into_output(self) -> Result<(RunSummary, ReportPaths)> {
        match (self.summary, self.report) {
            (Some(summary), Some(report)) => Ok((summary, report)),
            _ => Err(anyhow!("run finished without a summary and report")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) enum RunStage {
    LoadResources,
    AnswerQuestions,
    Score,
    Finalize,
}

impl RunStage {
    pub fn label(self) -> &'static str {
        match self {
            RunStage::LoadResources => "load-resources",
            RunStage::AnswerQuestions => "answer-questions",
            RunStage::Score => "score",
            RunStage::Finalize => "finalize",
        }
    }
}
