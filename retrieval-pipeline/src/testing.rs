//! Scripted collaborators for unit tests here and in downstream crates.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use common::error::AppError;

use crate::{
    generation::{GenerationBackend, Generator, RetryPolicy},
    reranking::CrossEncoder,
    truncation::{ReferenceTokenizer, TextBudgetTruncator},
    vector::VectorIndex,
};

/// One token per whitespace-terminated word; decoding concatenates the pieces.
#[derive(Default)]
pub struct WordTokenizer {
    vocab: Mutex<Vocab>,
}

#[derive(Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    pieces: Vec<String>,
}

impl ReferenceTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, AppError> {
        let mut vocab = self.vocab.lock().unwrap();
        Ok(text
            .split_inclusive(char::is_whitespace)
            .map(|piece| {
                if let Some(id) = vocab.ids.get(piece) {
                    return *id;
                }
                let id = u32::try_from(vocab.pieces.len()).unwrap();
                vocab.ids.insert(piece.to_owned(), id);
                vocab.pieces.push(piece.to_owned());
                id
            })
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, AppError> {
        let vocab = self.vocab.lock().unwrap();
        ids.iter()
            .map(|id| {
                vocab
                    .pieces
                    .get(*id as usize)
                    .map(String::as_str)
                    .ok_or_else(|| AppError::Tokenizer(format!("unknown token id {id}")))
            })
            .collect()
    }
}

pub fn word_truncator() -> TextBudgetTruncator {
    TextBudgetTruncator::new(Arc::new(WordTokenizer::default()))
}

type Responder = Box<dyn Fn(&str) -> Result<String, AppError> + Send + Sync>;

/// Generation backend driven by a closure over the prompt. Records every
/// `(prompt, max_new_tokens)` it receives.
pub struct ScriptedBackend {
    responder: Responder,
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedBackend {
    pub fn new(responder: impl Fn(&str) -> Result<String, AppError> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn constant(text: &str) -> Self {
        let text = text.to_owned();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(AppError::InternalError("scripted failure".into())))
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_owned(), max_new_tokens));
        (self.responder)(prompt)
    }
}

/// A generator over `backend` with no retries and a word-level tokenizer.
pub fn generator_for(backend: Arc<dyn GenerationBackend>, max_len: usize) -> Generator {
    Generator::new(backend, word_truncator(), max_len, RetryPolicy::none())
}

/// Cross-encoder that scores passages from a fixed table; unknown passages score 0.
pub struct FixedScoreEncoder {
    scores: HashMap<String, f32>,
    calls: AtomicUsize,
}

impl FixedScoreEncoder {
    pub fn new<'a>(scores: impl IntoIterator<Item = (&'a str, f32)>) -> Self {
        Self {
            scores: scores
                .into_iter()
                .map(|(text, score)| (text.to_owned(), score))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrossEncoder for FixedScoreEncoder {
    async fn score(&self, _question: &str, passages: &[String]) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(passages
            .iter()
            .map(|passage| self.scores.get(passage).copied().unwrap_or_default())
            .collect())
    }
}

/// Vector index that ignores the query and returns the same hits every time.
pub struct StaticIndex {
    hits: Vec<(f32, usize)>,
}

impl StaticIndex {
    pub fn new(chunk_ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            hits: chunk_ids
                .into_iter()
                .enumerate()
                .map(|(rank, id)| (rank as f32, id))
                .collect(),
        }
    }
}

impl VectorIndex for StaticIndex {
    fn search(&self, _query: &[f32], k: usize) -> Result<Vec<(f32, usize)>, AppError> {
        Ok(self.hits.iter().take(k).copied().collect())
    }

    fn len(&self) -> usize {
        self.hits.len()
    }
}
