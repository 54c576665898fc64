use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::strategy::Strategy;

/// A cached answer and the prompt length recorded with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPrediction {
    pub answer: String,
    pub prompt_len: Option<usize>,
}

/// Append-only JSON-lines store, one file per strategy, keyed by exact
/// question text. Lines are never rewritten; the first usable match wins.
#[derive(Debug, Clone)]
pub struct PredictionCache {
    dir: PathBuf,
}

impl PredictionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, strategy: Strategy) -> PathBuf {
        self.dir.join(format!("{}.json", strategy.cache_key()))
    }

    /// First non-empty answer recorded for `question`.
    ///
    /// Records with an empty or missing answer are skipped, so a stored empty
    /// answer behaves like a miss. Malformed lines are logged and skipped.
    pub async fn lookup(&self, strategy: Strategy, question: &str) -> Result<Option<CachedPrediction>> {
        let path = self.path(strategy);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading prediction cache {}", path.display()))
            }
        };

        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %err,
                        "Skipping malformed cache line"
                    );
                    continue;
                }
            };
            if record.get("question").and_then(Value::as_str) != Some(question) {
                continue;
            }
            match record.get(strategy.cache_key()).and_then(Value::as_str) {
                Some(answer) if !answer.is_empty() => {
                    let prompt_len = record
                        .get("input_len")
                        .and_then(Value::as_u64)
                        .and_then(|len| usize::try_from(len).ok());
                    return Ok(Some(CachedPrediction {
                        answer: answer.to_owned(),
                        prompt_len,
                    }));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Appends one record; existing lines are left untouched.
    pub async fn store(
        &self,
        strategy: Strategy,
        question: &str,
        answer: &str,
        prompt_len: Option<usize>,
    ) -> Result<()> {
        let path = self.path(strategy);
        ensure_dir(&self.dir).await?;

        let mut line = serde_json::to_string(&json!({
            "question": question,
            strategy.cache_key(): answer,
            "input_len": prompt_len,
        }))
        .context("serialising cache record")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening prediction cache {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to prediction cache {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating cache directory {}", dir.display()))
}
