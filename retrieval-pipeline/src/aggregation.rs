use std::collections::{HashMap, HashSet};

use common::error::AppError;

use crate::{corpus::Corpus, truncation::TextBudgetTruncator, RankedChunk};

/// All ranked chunks of one parent document, concatenated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSpan {
    pub parent_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    FullParent,
    Chunk,
}

/// One item of expanded context and the ranked positions it accounts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedContent {
    pub content: String,
    pub source: ContentSource,
    pub group: Vec<usize>,
}

pub struct SectionAggregator<'a> {
    corpus: &'a Corpus,
    truncator: &'a TextBudgetTruncator,
}

impl<'a> SectionAggregator<'a> {
    pub fn new(corpus: &'a Corpus, truncator: &'a TextBudgetTruncator) -> Self {
        Self { corpus, truncator }
    }

    /// Collapses ranked chunks into one span per parent document.
    ///
    /// Parents appear in order of their best-ranked chunk; within a parent,
    /// chunks are concatenated in ascending chunk id order.
    pub fn reduce_to_unique_parents(
        &self,
        ranked: &[RankedChunk],
    ) -> Result<Vec<ParentSpan>, AppError> {
        let mut order: Vec<&str> = Vec::new();
        let mut members: HashMap<&str, Vec<&RankedChunk>> = HashMap::new();
        for chunk in ranked {
            let parent = self.corpus.parent_id(chunk.chunk_id)?;
            let entry = members.entry(parent).or_default();
            if entry.is_empty() {
                order.push(parent);
            }
            entry.push(chunk);
        }

        Ok(order
            .into_iter()
            .map(|parent| {
                let mut chunks = members.remove(parent).unwrap_or_default();
                chunks.sort_by_key(|chunk| chunk.chunk_id);
                ParentSpan {
                    parent_id: parent.to_owned(),
                    content: chunks.iter().map(|chunk| chunk.text.as_str()).collect(),
                }
            })
            .collect())
    }

    /// Replaces each ranked chunk by its full parent document when the parent is
    /// shorter than `max_tokens`, emitting each such parent once.
    ///
    /// Chunks of an oversized parent are kept verbatim, one item per chunk. Every
    /// ranked position lands in exactly one item's `group`.
    pub fn expand_to_parent_or_chunk(
        &self,
        ranked: &[RankedChunk],
        max_tokens: usize,
    ) -> Result<Vec<ExpandedContent>, AppError> {
        let parents = ranked
            .iter()
            .map(|chunk| self.corpus.parent_id(chunk.chunk_id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut parent_lengths: HashMap<&str, usize> = HashMap::new();
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut contents = Vec::new();

        for (position, (chunk, parent)) in ranked.iter().zip(&parents).enumerate() {
            let text = self.corpus.parent_text(parent)?;
            let length = match parent_lengths.get(parent) {
                Some(length) => *length,
                None => {
                    let length = self.truncator.token_count(text)?;
                    parent_lengths.insert(parent, length);
                    length
                }
            };

            if length >= max_tokens {
                contents.push(ExpandedContent {
                    content: chunk.text.clone(),
                    source: ContentSource::Chunk,
                    group: vec![position],
                });
                continue;
            }

            if !emitted.insert(parent) {
                continue;
            }

            let group = parents
                .iter()
                .enumerate()
                .filter(|(_, other)| *other == parent)
                .map(|(idx, _)| idx)
                .collect();
            contents.push(ExpandedContent {
                content: text.to_owned(),
                source: ContentSource::FullParent,
                group,
            });
        }

        Ok(contents)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::WordTokenizer;

    fn ranked(chunk_id: usize, text: &str) -> RankedChunk {
        RankedChunk {
            chunk_id,
            text: text.to_string(),
            score: 1.0,
        }
    }

    fn words(count: usize) -> String {
        vec!["word"; count].join(" ")
    }

    fn corpus() -> Corpus {
        let chunks = vec![
            "A".to_string(),
            "B".to_string(),
            "C".to_string(),
            "D".to_string(),
            "E".to_string(),
        ];
        let parents = HashMap::from([
            (0, "p-small".to_string()),
            (1, "p-other".to_string()),
            (2, "p-small".to_string()),
            (3, "p-large".to_string()),
            (4, "p-large".to_string()),
        ]);
        let documents = HashMap::from([
            ("p-small".to_string(), words(50)),
            ("p-other".to_string(), words(50)),
            ("p-large".to_string(), words(2000)),
        ]);
        Corpus::new(chunks, parents, documents)
    }

    fn truncator() -> TextBudgetTruncator {
        TextBudgetTruncator::new(Arc::new(WordTokenizer::default()))
    }

    #[test]
    fn distinct_small_parents_expand_to_full_documents() {
        let corpus = corpus();
        let truncator = truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);

        let out = aggregator
            .expand_to_parent_or_chunk(&[ranked(0, "A"), ranked(1, "B")], 1000)
            .expect("expand");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.source == ContentSource::FullParent));
        assert_eq!(out[0].content, words(50));
        assert_eq!(out[0].group, vec![0]);
        assert_eq!(out[1].group, vec![1]);
    }

    #[test]
    fn shared_parent_is_emitted_once_and_oversized_parent_falls_back_to_chunks() {
        let corpus = corpus();
        let truncator = truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);
        let input = [
            ranked(3, "D"),
            ranked(0, "A"),
            ranked(2, "C"),
            ranked(4, "E"),
            ranked(1, "B"),
        ];

        let out = aggregator
            .expand_to_parent_or_chunk(&input, 1000)
            .expect("expand");

        let contents: Vec<&str> = out.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["D", words(50).as_str(), "E", words(50).as_str()]);
        assert_eq!(out[0].group, vec![0]);
        assert_eq!(out[1].group, vec![1, 2]);
        assert_eq!(out[2].group, vec![3]);
        assert_eq!(out[3].group, vec![4]);

        let mut positions: Vec<usize> = out.iter().flat_map(|c| c.group.clone()).collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..input.len()).collect::<Vec<_>>());

        let full_parents = out
            .iter()
            .filter(|c| c.source == ContentSource::FullParent)
            .count();
        assert_eq!(full_parents, 2);
    }

    #[test]
    fn parent_at_budget_counts_as_oversized() {
        let corpus = corpus();
        let truncator = truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);

        let out = aggregator
            .expand_to_parent_or_chunk(&[ranked(0, "A"), ranked(2, "C")], 50)
            .expect("expand");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.source == ContentSource::Chunk));
    }

    #[test]
    fn unique_parents_concatenate_in_chunk_id_order() {
        let corpus = corpus();
        let truncator = truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);

        let spans = aggregator
            .reduce_to_unique_parents(&[ranked(2, "C"), ranked(1, "B"), ranked(0, "A")])
            .expect("reduce");
        assert_eq!(
            spans,
            vec![
                ParentSpan {
                    parent_id: "p-small".into(),
                    content: "AC".into(),
                },
                ParentSpan {
                    parent_id: "p-other".into(),
                    content: "B".into(),
                },
            ]
        );
    }

    #[test]
    fn unknown_chunk_propagates_not_found() {
        let corpus = corpus();
        let truncator = truncator();
        let aggregator = SectionAggregator::new(&corpus, &truncator);
        assert!(matches!(
            aggregator.expand_to_parent_or_chunk(&[ranked(99, "?")], 10),
            Err(AppError::NotFound(_))
        ));
    }
}
