pub mod aggregation;
pub mod corpus;
pub mod embedding;
pub mod extractor;
pub mod filter;
pub mod generation;
pub mod prompts;
pub mod reranking;
pub mod truncation;
pub mod vector;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use aggregation::{ContentSource, ExpandedContent, ParentSpan, SectionAggregator};
pub use corpus::Corpus;
pub use extractor::CitationExtractor;
pub use filter::RelevanceFilter;
pub use generation::{Generation, GenerationBackend, Generator, RetryPolicy};
pub use reranking::{CrossEncoder, Reranker};
pub use truncation::{ReferenceTokenizer, TextBudgetTruncator};
pub use vector::{FlatIndex, VectorIndex, VectorRetriever};

/// A nearest-neighbour hit: chunk text plus its position in the corpus chunk array.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: usize,
    pub text: String,
    pub distance: f32,
}

/// A chunk after cross-encoder scoring; higher scores are more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_id: usize,
    pub text: String,
    pub score: f32,
}

/// Passage texts of a ranked list, in rank order.
pub fn ranked_texts(ranked: &[RankedChunk]) -> Vec<String> {
    ranked.iter().map(|chunk| chunk.text.clone()).collect()
}
