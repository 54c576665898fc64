use std::{cmp::Ordering, path::Path};

use common::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{corpus::Corpus, embedding::EmbeddingProvider, RetrievedChunk};

const INDEX_BUILD_BATCH: usize = 256;

/// Nearest-neighbour index over the corpus chunk array. Returned ids index into
/// [`Corpus::chunks`].
pub trait VectorIndex: Send + Sync {
    /// Up to `k` `(distance, chunk id)` pairs, closest first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>, AppError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive squared-L2 index, persisted as JSON next to the chunk store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self, AppError> {
        if let Some((idx, bad)) = vectors
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != dimension)
        {
            return Err(AppError::Index(format!(
                "vector {idx} has dimension {}, expected {dimension}",
                bad.len()
            )));
        }
        Ok(Self { dimension, vectors })
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read(path)?;
        let index: Self = serde_json::from_slice(&raw)?;
        Self::new(index.dimension, index.vectors)
    }

    pub fn persist(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    /// Reuses the index at `path` when it matches the corpus and provider,
    /// otherwise embeds every chunk and writes a fresh index.
    pub async fn load_or_build(
        path: &Path,
        corpus: &Corpus,
        provider: &EmbeddingProvider,
    ) -> Result<Self, AppError> {
        if path.exists() {
            let index = Self::load(path)?;
            if index.len() == corpus.chunks().len() && index.dimension == provider.dimension() {
                info!(path = %path.display(), vectors = index.len(), "Reusing vector index");
                return Ok(index);
            }
            info!(
                path = %path.display(),
                vectors = index.len(),
                chunks = corpus.chunks().len(),
                "Vector index is stale; rebuilding"
            );
        }

        let mut vectors = Vec::with_capacity(corpus.chunks().len());
        for batch in corpus.chunks().chunks(INDEX_BUILD_BATCH) {
            vectors.extend(provider.embed_batch(batch.to_vec()).await?);
        }
        let index = Self::new(provider.dimension(), vectors)?;
        index.persist(path)?;
        info!(path = %path.display(), vectors = index.len(), "Built vector index");
        Ok(index)
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>, AppError> {
        if query.len() != self.dimension {
            return Err(AppError::Index(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vector)| (squared_l2(query, vector), id))
            .collect();
        hits.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub struct VectorRetriever<'a> {
    index: &'a dyn VectorIndex,
    provider: &'a EmbeddingProvider,
    corpus: &'a Corpus,
}

impl<'a> VectorRetriever<'a> {
    pub fn new(
        index: &'a dyn VectorIndex,
        provider: &'a EmbeddingProvider,
        corpus: &'a Corpus,
    ) -> Self {
        Self {
            index,
            provider,
            corpus,
        }
    }

    /// Embeds `question` once and returns its `k1` nearest chunks, closest first.
    #[instrument(skip_all, fields(k1))]
    pub async fn retrieve(&self, question: &str, k1: usize) -> Result<Vec<RetrievedChunk>, AppError> {
        if self.index.is_empty() {
            return Err(AppError::Index("vector index holds no vectors".into()));
        }
        let embedding = self.provider.embed(question).await?;
        let hits = self.index.search(&embedding, k1)?;
        hits.into_iter()
            .map(|(distance, chunk_id)| {
                Ok(RetrievedChunk {
                    chunk_id,
                    text: self.corpus.chunk(chunk_id)?.to_owned(),
                    distance,
                })
            })
            .collect()
    }
}
