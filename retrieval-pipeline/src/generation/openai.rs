use std::{env, sync::Arc};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
        CreateCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::{
    error::AppError,
    utils::config::{ModelFamilyKind, ModelSpec, PromptTemplate},
};
use tracing::{debug, info};

use super::GenerationBackend;

const DEDUPE_THRESHOLD: usize = 5;
const SENTENCE_ENDINGS: &[char] = &['。', '！', '？', ',', '，'];
const DEFAULT_REMOTE_TEMPERATURE: f32 = 1.0;
const VICUNA_SYSTEM: &str = "A chat between a curious user and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the user's questions.";

/// Builds the backend for a registry entry. The family decides the transport,
/// the decoding policy and whether a prompt template is applied client side.
pub fn build_backend(name: &str, spec: &ModelSpec) -> Result<Arc<dyn GenerationBackend>, AppError> {
    let client = build_client(spec)?;
    info!(
        model = name,
        family = ?spec.family,
        base_url = %spec.base_url,
        max_len = spec.max_len,
        "Configured generation backend"
    );

    let backend: Arc<dyn GenerationBackend> = match spec.family {
        ModelFamilyKind::RemoteChat => Arc::new(ChatCompletionBackend {
            client,
            model: spec.model.clone(),
            temperature: spec.temperature.unwrap_or(DEFAULT_REMOTE_TEMPERATURE),
            resend_deduplicated: true,
        }),
        ModelFamilyKind::LocalChat => Arc::new(ChatCompletionBackend {
            client,
            model: spec.model.clone(),
            temperature: 0.0,
            resend_deduplicated: false,
        }),
        ModelFamilyKind::LocalCausal => Arc::new(CompletionBackend {
            client,
            model: spec.model.clone(),
            template: spec.template,
        }),
    };
    Ok(backend)
}

fn build_client(spec: &ModelSpec) -> Result<Client<OpenAIConfig>, AppError> {
    let mut config = OpenAIConfig::new().with_api_base(&spec.base_url);
    if let Some(key_var) = spec.api_key_env.as_deref() {
        let api_key = env::var(key_var).map_err(|_| {
            AppError::Validation(format!(
                "{key_var} must be set to use model '{}'",
                spec.model
            ))
        })?;
        config = config.with_api_key(api_key);
    }
    Ok(Client::with_config(config))
}

/// OpenAI-compatible chat endpoint, hosted or served locally.
pub struct ChatCompletionBackend {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    resend_deduplicated: bool,
}

impl ChatCompletionBackend {
    async fn complete(&self, prompt: &str, max_new_tokens: usize) -> Result<Option<String>, AppError> {
        #[allow(deprecated)]
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([ChatCompletionRequestUserMessage::from(prompt.to_owned()).into()])
            .max_tokens(clamp_tokens(max_new_tokens))
            .temperature(self.temperature)
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

#[async_trait]
impl GenerationBackend for ChatCompletionBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, AppError> {
        match self.complete(prompt, max_new_tokens).await? {
            Some(text) if !text.is_empty() || !self.resend_deduplicated => Ok(text),
            None if !self.resend_deduplicated => Err(empty_response(&self.model)),
            _ => {
                // Hosted APIs sometimes refuse heavily repetitive input.
                debug!(model = %self.model, "Empty completion; resending with repeated sentences collapsed");
                let cleaned = dedupe_repeated_sentences(prompt, DEDUPE_THRESHOLD);
                self.complete(&cleaned, max_new_tokens)
                    .await?
                    .ok_or_else(|| empty_response(&self.model))
            }
        }
    }
}

/// Raw completion endpoint of a local engine; the chat template is applied here.
pub struct CompletionBackend {
    client: Client<OpenAIConfig>,
    model: String,
    template: PromptTemplate,
}

#[async_trait]
impl GenerationBackend for CompletionBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, AppError> {
        let request = CreateCompletionRequestArgs::default()
            .model(&self.model)
            .prompt(apply_template(self.template, prompt))
            .max_tokens(clamp_tokens(max_new_tokens))
            .temperature(0.0)
            .build()?;

        let response = self.client.completions().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text.trim().to_owned())
            .ok_or_else(|| empty_response(&self.model))
    }
}

fn apply_template(template: PromptTemplate, prompt: &str) -> String {
    match template {
        PromptTemplate::Plain => prompt.to_owned(),
        PromptTemplate::Llama2Inst => format!("[INST]{prompt}[/INST]"),
        PromptTemplate::Vicuna => format!("{VICUNA_SYSTEM} USER: {prompt} ASSISTANT:"),
    }
}

fn clamp_tokens(max_new_tokens: usize) -> u32 {
    u32::try_from(max_new_tokens).unwrap_or(u32::MAX)
}

fn empty_response(model: &str) -> AppError {
    AppError::InternalError(format!("model '{model}' returned no content"))
}

/// Collapses every run of at least `threshold` identical consecutive sentences
/// into a single sentence. Sentences end at `。！？,，`; shorter runs are kept.
pub fn dedupe_repeated_sentences(text: &str, threshold: usize) -> String {
    let mut pieces: Vec<(&str, &str)> = Vec::new();
    let mut start = 0;
    for (offset, delimiter) in text.match_indices(SENTENCE_ENDINGS) {
        pieces.push((text.get(start..offset).unwrap_or_default().trim(), delimiter));
        start = offset + delimiter.len();
    }
    pieces.push((text.get(start..).unwrap_or_default().trim(), ""));

    let mut runs: Vec<(&str, Vec<&str>)> = Vec::new();
    for (sentence, delimiter) in pieces {
        match runs.last_mut() {
            Some((current, delimiters)) if *current == sentence => delimiters.push(delimiter),
            _ => runs.push((sentence, vec![delimiter])),
        }
    }

    let mut cleaned = String::with_capacity(text.len());
    for (sentence, delimiters) in runs {
        if delimiters.len() >= threshold {
            cleaned.push_str(sentence);
            cleaned.push_str(delimiters.last().copied().unwrap_or_default());
        } else {
            for delimiter in delimiters {
                cleaned.push_str(sentence);
                cleaned.push_str(delimiter);
            }
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_runs_of_repeated_sentences_collapse() {
        let text = "spam,spam,spam,spam,spam,spam,eggs。";
        assert_eq!(dedupe_repeated_sentences(text, 5), "spam,eggs。");
    }

    #[test]
    fn short_runs_are_kept() {
        let text = "a，a，b！c";
        assert_eq!(dedupe_repeated_sentences(text, 5), text);
    }

    #[test]
    fn sentences_are_trimmed() {
        assert_eq!(dedupe_repeated_sentences(" x , y", 5), "x,y");
    }

    #[test]
    fn templates_wrap_the_prompt() {
        assert_eq!(apply_template(PromptTemplate::Plain, "hi"), "hi");
        assert_eq!(apply_template(PromptTemplate::Llama2Inst, "hi"), "[INST]hi[/INST]");
        let vicuna = apply_template(PromptTemplate::Vicuna, "hi");
        assert!(vicuna.starts_with(VICUNA_SYSTEM));
        assert!(vicuna.ends_with("USER: hi ASSISTANT:"));
    }

    #[test]
    fn missing_api_key_variable_is_rejected() {
        let spec = ModelSpec {
            family: ModelFamilyKind::RemoteChat,
            template: PromptTemplate::Plain,
            model: "gpt-4o-mini".into(),
            base_url: "http://localhost:1".into(),
            api_key_env: Some("LONGRAG_TEST_KEY_THAT_IS_NEVER_SET".into()),
            max_len: 16_000,
            min_new_tokens: None,
            temperature: None,
        };
        assert!(matches!(
            build_backend("gpt-4o-mini", &spec),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn local_backends_need_no_key() {
        let spec = ModelSpec {
            family: ModelFamilyKind::LocalCausal,
            template: PromptTemplate::Vicuna,
            model: "vicuna-7b-v1.5-16k".into(),
            base_url: "http://localhost:8000/v1".into(),
            api_key_env: None,
            max_len: 16_000,
            min_new_tokens: None,
            temperature: None,
        };
        let backend = build_backend("vicuna-v1.5-7b-16k", &spec).expect("backend");
        assert_eq!(backend.model(), "vicuna-7b-v1.5-16k");
    }
}
