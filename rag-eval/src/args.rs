use std::{fmt, path::PathBuf};

use anyhow::{ensure, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use tracing::info;

use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetKind {
    #[value(name = "hotpotqa", alias = "hotpot-qa")]
    HotpotQa,
    #[value(name = "2wikimultihopqa", alias = "2wiki")]
    TwoWikiMultihopQa,
    #[value(name = "musique")]
    Musique,
}

impl DatasetKind {
    pub fn id(self) -> &'static str {
        match self {
            Self::HotpotQa => "hotpotqa",
            Self::TwoWikiMultihopQa => "2wikimultihopqa",
            Self::Musique => "musique",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::HotpotQa => "HotpotQA",
            Self::TwoWikiMultihopQa => "2WikiMultihopQA",
            Self::Musique => "MuSiQue",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "rag-eval",
    about = "Answer a multi-hop QA dataset with several retrieval strategies and score them"
)]
pub struct Config {
    /// Dataset to evaluate
    #[arg(long, default_value_t = DatasetKind::HotpotQa)]
    pub dataset: DatasetKind,

    /// Number of candidates after initial retrieval
    #[arg(long = "top-k1", alias = "top_k1", default_value_t = 100)]
    pub top_k1: usize,

    /// Number of candidates after reranking
    #[arg(long = "top-k2", alias = "top_k2", default_value_t = 7)]
    pub top_k2: usize,

    /// Registry name of the model that writes final answers
    #[arg(long, default_value = "chatGLM3-6b-32k")]
    pub model: String,

    /// Registry name of the model used for filtering and extraction (defaults to --model)
    #[arg(long = "lrag-model", alias = "lrag_model")]
    pub lrag_model: Option<String>,

    /// Answer directly, without retrieval
    #[arg(long = "raw-pred", alias = "raw_pred")]
    pub raw_pred: bool,

    /// Answer from the reranked passages
    #[arg(long)]
    pub rb: bool,

    /// Answer from the reranked passages plus extracted citations
    #[arg(long)]
    pub ext: bool,

    /// Answer from the filtered passages
    #[arg(long)]
    pub fil: bool,

    /// Answer from the filtered passages plus extracted citations
    #[arg(long = "ext-fil", alias = "ext_fil")]
    pub ext_fil: bool,

    /// Answer from reranked passages expanded to their parent documents
    #[arg(long)]
    pub rl: bool,

    /// Parallel relevance-verdict calls
    #[arg(long = "max-clients", alias = "MaxClients", default_value_t = 1)]
    pub max_clients: usize,

    /// Output directory for caches, logs and results (defaults under ./log)
    #[arg(long = "log-path", alias = "log_path")]
    pub log_path: Option<PathBuf>,

    /// Directory holding the per-dataset chunk store and vector index
    #[arg(
        long = "r-path",
        alias = "r_path",
        default_value = "../data/corpus/processed/200_2_2"
    )]
    pub r_path: PathBuf,

    /// Root of the raw corpora and evaluation sets (overrides the registry's data_dir)
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Evaluate only the first N questions (0 = all)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Model registry file (yaml, toml or json)
    #[arg(long, env = "LONGRAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Resolved output directory; set by [`Config::finalize`].
    #[arg(skip)]
    pub output_dir: PathBuf,
}

impl Config {
    pub fn finalize(&mut self) -> Result<()> {
        ensure!(self.top_k1 > 0, "--top-k1 must be greater than zero");
        ensure!(self.top_k2 > 0, "--top-k2 must be greater than zero");
        ensure!(
            self.top_k2 <= self.top_k1,
            "--top-k2 ({}) must not exceed --top-k1 ({})",
            self.top_k2,
            self.top_k1
        );
        ensure!(self.max_clients > 0, "--max-clients must be greater than zero");
        ensure!(
            !self.enabled_strategies().is_empty(),
            "enable at least one of --raw-pred, --rb, --ext, --fil, --ext-fil, --rl"
        );

        if self.lrag_model.as_deref().is_some_and(str::is_empty) {
            self.lrag_model = None;
        }

        self.output_dir = match &self.log_path {
            Some(path) => path.clone(),
            None => self.default_output_dir(),
        };
        Ok(())
    }

    fn default_output_dir(&self) -> PathBuf {
        let store = self
            .r_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        PathBuf::from("./log")
            .join(store)
            .join(self.dataset.id())
            .join(&self.model)
            .join(self.lrag_model.as_deref().unwrap_or("base"))
            .join(Local::now().format("%Y-%m-%d-%H:%M:%S").to_string())
    }

    /// Model used for filtering and extraction.
    pub fn long_context_model(&self) -> &str {
        self.lrag_model.as_deref().unwrap_or(&self.model)
    }

    /// Enabled strategies, in execution order.
    pub fn enabled_strategies(&self) -> Vec<Strategy> {
        Strategy::ALL
            .into_iter()
            .filter(|strategy| match strategy {
                Strategy::Raw => self.raw_pred,
                Strategy::Baseline => self.rb,
                Strategy::Extractor => self.ext,
                Strategy::Filter => self.fil,
                Strategy::ExtractorFilter => self.ext_fil,
                Strategy::LongDoc => self.rl,
            })
            .collect()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.r_path.join(self.dataset.id())
    }

    /// Logs every option, one per line, sorted by name.
    pub fn log_configuration(&self) {
        let mut options = vec![
            ("config", format!("{:?}", self.config)),
            ("data_dir", format!("{:?}", self.data_dir)),
            ("dataset", self.dataset.to_string()),
            ("ext", self.ext.to_string()),
            ("ext_fil", self.ext_fil.to_string()),
            ("fil", self.fil.to_string()),
            ("limit", self.limit.to_string()),
            ("log_path", self.output_dir.display().to_string()),
            ("lrag_model", format!("{:?}", self.lrag_model)),
            ("max_clients", self.max_clients.to_string()),
            ("model", self.model.clone()),
            ("r_path", self.r_path.display().to_string()),
            ("raw_pred", self.raw_pred.to_string()),
            ("rb", self.rb.to_string()),
            ("rl", self.rl.to_string()),
            ("top_k1", self.top_k1.to_string()),
            ("top_k2", self.top_k2.to_string()),
        ];
        options.sort_by_key(|(key, _)| *key);

        info!("{} CONFIGURATION {}", "*".repeat(30), "*".repeat(30));
        for (key, value) in options {
            info!("{key:<30} --> {value}");
        }
        info!("LongRAG model used: {}", self.long_context_model());
        info!("{} CONFIGURATION {}", "*".repeat(30), "*".repeat(30));
    }
}

pub struct ParsedArgs {
    pub config: Config,
}

pub fn parse() -> Result<ParsedArgs> {
    let mut config = Config::parse();
    config.finalize()?;
    Ok(ParsedArgs { config })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> Result<Config> {
        let mut config = Config::try_parse_from(std::iter::once("rag-eval").chain(args.iter().copied()))?;
        config.finalize()?;
        Ok(config)
    }

    #[test]
    fn defaults_follow_run_conventions() {
        let config = parse_from(&["--rb", "--dataset", "musique"]).expect("parse");
        assert_eq!(config.top_k1, 100);
        assert_eq!(config.top_k2, 7);
        assert_eq!(config.max_clients, 1);
        assert_eq!(config.long_context_model(), "chatGLM3-6b-32k");
        assert_eq!(config.enabled_strategies(), vec![Strategy::Baseline]);

        let output = config.output_dir.to_string_lossy().into_owned();
        assert!(output.starts_with("./log/200_2_2/musique/chatGLM3-6b-32k/base/"));
    }

    #[test]
    fn strategies_run_in_fixed_order() {
        let config = parse_from(&["--rl", "--fil", "--raw-pred", "--ext-fil", "--ext", "--rb"])
            .expect("parse");
        assert_eq!(config.enabled_strategies(), Strategy::ALL.to_vec());
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(parse_from(&["--rb", "--top-k1", "5", "--top-k2", "6"]).is_err());
        assert!(parse_from(&["--rb", "--top-k2", "0"]).is_err());
        assert!(parse_from(&["--rb", "--max-clients", "0"]).is_err());
        assert!(parse_from(&[]).is_err());
    }

    #[test]
    fn explicit_log_path_wins() {
        let config = parse_from(&["--fil", "--log-path", "/tmp/run", "--lrag-model", "gpt-4o-mini"])
            .expect("parse");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/run"));
        assert_eq!(config.long_context_model(), "gpt-4o-mini");
    }
}
