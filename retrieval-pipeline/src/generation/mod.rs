pub mod openai;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{error::AppError, utils::config::ModelSpec};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, warn};

use crate::truncation::TextBudgetTruncator;

pub use openai::{build_backend, dedupe_repeated_sentences};

/// A text-generation engine. An `Err` means the call failed and may be retried;
/// `Ok("")` is a valid, empty completion.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, AppError>;
}

/// Outcome of one generation call after retries. `text == None` is the failure
/// sentinel: the prediction is unavailable, but the run goes on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: Option<String>,
    pub prompt_len: Option<usize>,
}

impl Generation {
    pub fn failed() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Exponential backoff with jitter. `max_elapsed` bounds the wall-clock time of
    /// all attempts and sleeps together; a call still running then is abandoned.
    Backoff { max_elapsed: Duration },
    /// A fixed number of retries with no delay.
    Immediate { retries: usize },
}

impl RetryPolicy {
    const MAX_DELAY: Duration = Duration::from_secs(60);
    const MAX_ATTEMPTS: usize = 64;

    pub fn backoff(max_elapsed: Duration) -> Self {
        Self::Backoff { max_elapsed }
    }

    pub fn none() -> Self {
        Self::Immediate { retries: 0 }
    }

    fn ceiling(&self) -> Option<Duration> {
        match *self {
            Self::Backoff { max_elapsed } => Some(max_elapsed),
            Self::Immediate { .. } => None,
        }
    }

    fn delays(&self) -> Vec<Duration> {
        match *self {
            Self::Immediate { retries } => vec![Duration::ZERO; retries],
            Self::Backoff { max_elapsed } => ExponentialBackoff::from_millis(2)
                .factor(500)
                .max_delay(Self::MAX_DELAY)
                .map(jitter)
                .take(Self::MAX_ATTEMPTS)
                .scan(Duration::ZERO, |elapsed, delay| {
                    *elapsed += delay;
                    (*elapsed <= max_elapsed).then_some(delay)
                })
                .collect(),
        }
    }
}

/// One generation model bound to its context ceiling and retry policy.
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
    truncator: TextBudgetTruncator,
    max_len: usize,
    min_new_tokens: usize,
    retry: RetryPolicy,
}

impl Generator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        truncator: TextBudgetTruncator,
        max_len: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            truncator,
            max_len,
            min_new_tokens: 0,
            retry,
        }
    }

    pub fn from_spec(
        backend: Arc<dyn GenerationBackend>,
        truncator: TextBudgetTruncator,
        spec: &ModelSpec,
        retry: RetryPolicy,
    ) -> Self {
        Self::new(backend, truncator, spec.max_len, retry)
            .with_min_new_tokens(spec.min_new_tokens.unwrap_or_default())
    }

    #[must_use]
    pub fn with_min_new_tokens(mut self, min_new_tokens: usize) -> Self {
        self.min_new_tokens = min_new_tokens;
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Clips `prompt` to the context ceiling and generates, retrying per policy.
    ///
    /// Never returns an error: tokenizer failures and exhausted retries both come
    /// back as [`Generation::failed`]. On success `prompt_len` is the length of
    /// the prompt before clipping.
    pub async fn generate(&self, prompt: &str, max_new_tokens: usize) -> Generation {
        let max_new_tokens = max_new_tokens.max(self.min_new_tokens);
        let (prompt, prompt_len) = match self.truncator.truncate(prompt, self.max_len) {
            Ok(clipped) => clipped,
            Err(err) => {
                warn!(model = self.model(), error = %err, "Failed to measure prompt");
                return Generation::failed();
            }
        };

        let backend = &self.backend;
        let prompt = prompt.as_str();
        let attempts = Retry::spawn(self.retry.delays(), || async move {
            backend
                .generate(prompt, max_new_tokens)
                .await
                .inspect_err(|err| debug!(model = backend.model(), error = %err, "Generation attempt failed"))
        });
        let outcome = match self.retry.ceiling() {
            Some(ceiling) => match tokio::time::timeout(ceiling, attempts).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        model = self.model(),
                        prompt_len,
                        ceiling_ms = ceiling.as_millis(),
                        "Generation exceeded retry time ceiling"
                    );
                    return Generation::failed();
                }
            },
            None => attempts.await,
        };

        match outcome {
            Ok(text) => Generation {
                text: Some(text),
                prompt_len: Some(prompt_len),
            },
            Err(err) => {
                warn!(
                    model = self.model(),
                    prompt_len,
                    error = %err,
                    "Generation failed after retries"
                );
                Generation::failed()
            }
        }
    }
}
