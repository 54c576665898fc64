use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Vector index error: {0}")]
    Index(String),
    #[error("Rerank error: {0}")]
    Rerank(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl From<tokenizers::Error> for AppError {
    fn from(err: tokenizers::Error) -> Self {
        Self::Tokenizer(err.to_string())
    }
}
