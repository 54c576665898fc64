use std::{collections::HashMap, path::Path};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// How a generation model is reached. Chosen once per run from the registry.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamilyKind {
    /// Hosted chat-completion API (GPT, GLM-4, ...).
    RemoteChat,
    /// Local inference engine that applies the chat template itself.
    LocalChat,
    /// Local inference engine exposing raw completions; the prompt template is applied here.
    LocalCausal,
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    #[default]
    Plain,
    Llama2Inst,
    Vicuna,
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    #[default]
    FastEmbed,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct ModelSpec {
    pub family: ModelFamilyKind,
    #[serde(default)]
    pub template: PromptTemplate,
    /// Model identifier sent to the serving endpoint.
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Context ceiling in reference-tokenizer tokens.
    pub max_len: usize,
    /// Lower bound applied to every requested new-token budget.
    #[serde(default)]
    pub min_new_tokens: Option<usize>,
    /// Sampling temperature for remote models; local families always decode greedily.
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub models: HashMap<String, ModelSpec>,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_hashed_dimension")]
    pub hashed_embedding_dimension: usize,
    #[serde(default = "default_reference_tokenizer")]
    pub reference_tokenizer: String,
    #[serde(default = "default_retry_max_time_secs")]
    pub retry_max_time_secs: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,
    #[serde(default)]
    pub fastembed_max_length: Option<usize>,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
}

impl AppConfig {
    /// Looks up a model by name, ignoring ASCII case.
    pub fn model(&self, name: &str) -> Result<&ModelSpec, AppError> {
        self.models
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, spec)| spec)
            .ok_or_else(|| AppError::NotFound(format!("model '{name}' is not in the registry")))
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_hashed_dimension() -> usize {
    384
}

fn default_reference_tokenizer() -> String {
    "THUDM/chatglm3-6b".to_string()
}

fn default_retry_max_time_secs() -> u64 {
    200
}

fn default_data_dir() -> String {
    "../data".to_string()
}

/// Loads the registry from `path` (or `./config.*` when absent), then applies
/// `LONGRAG__*` environment overrides.
pub fn get_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config").required(false),
    };
    let config = Config::builder()
        .add_source(file)
        .add_source(Environment::with_prefix("LONGRAG").separator("__"))
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn registry_file_is_parsed_with_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        writeln!(
            file,
            r#"
reference_tokenizer = "tokenizer.json"

[models.gpt-4o-mini]
family = "remote_chat"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
max_len = 15500
temperature = 1.0

[models.longalign-7b-64k]
family = "local_causal"
template = "llama2_inst"
model = "LongAlign-7B-64k"
base_url = "http://127.0.0.1:8000/v1"
max_len = 63500
min_new_tokens = 128
"#
        )
        .expect("write config");

        let config = get_config(Some(file.path())).expect("config should load");
        assert_eq!(config.reference_tokenizer, "tokenizer.json");
        assert_eq!(config.retry_max_time_secs, 200);
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::FastEmbed);

        let gpt = config.model("GPT-4o-Mini").expect("case-insensitive lookup");
        assert_eq!(gpt.family, ModelFamilyKind::RemoteChat);
        assert_eq!(gpt.base_url, "https://api.openai.com/v1");

        let local = config.model("longalign-7b-64k").expect("local model");
        assert_eq!(local.template, PromptTemplate::Llama2Inst);
        assert_eq!(local.min_new_tokens, Some(128));
    }

    #[test]
    fn unknown_model_is_not_found() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        writeln!(file, "data_dir = \"/tmp/data\"").expect("write config");

        let config = get_config(Some(file.path())).expect("config should load");
        assert!(matches!(
            config.model("glm-4"),
            Err(AppError::NotFound(_))
        ));
    }
}
