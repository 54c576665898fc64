use std::{path::Path, sync::Arc};

use common::error::AppError;
use tokenizers::Tokenizer;
use tracing::debug;

/// Tokenizer used for every length measurement in a run, independent of the
/// generation model actually answering.
pub trait ReferenceTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, AppError>;
    fn decode(&self, ids: &[u32]) -> Result<String, AppError>;
}

impl ReferenceTokenizer for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, AppError> {
        // `Tokenizer` derefs to `TokenizerImpl`, which owns the real encode/decode.
        let encoding = (**self).encode(text, false)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, AppError> {
        Ok((**self).decode(ids, true)?)
    }
}

/// Loads a `tokenizer.json` from disk, or fetches it from the Hugging Face hub
/// when `name_or_path` is not an existing file.
pub fn load_reference_tokenizer(name_or_path: &str) -> Result<Tokenizer, AppError> {
    let path = Path::new(name_or_path);
    if path.is_file() {
        debug!(path = %path.display(), "Loading reference tokenizer from file");
        return Ok(Tokenizer::from_file(path)?);
    }
    debug!(model = name_or_path, "Fetching reference tokenizer from hub");
    Ok(Tokenizer::from_pretrained(name_or_path, None)?)
}

#[derive(Clone)]
pub struct TextBudgetTruncator {
    tokenizer: Arc<dyn ReferenceTokenizer>,
}

impl TextBudgetTruncator {
    pub fn new(tokenizer: Arc<dyn ReferenceTokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn token_count(&self, text: &str) -> Result<usize, AppError> {
        Ok(self.tokenizer.encode(text)?.len())
    }

    /// Clips `text` to `max_tokens` by keeping `max_tokens / 2` tokens from each end.
    ///
    /// The returned count is always the length *before* clipping, which is what the
    /// run reports as the prompt length.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> Result<(String, usize), AppError> {
        let ids = self.tokenizer.encode(text)?;
        let token_count = ids.len();
        if token_count <= max_tokens {
            return Ok((text.to_owned(), token_count));
        }

        let half = max_tokens / 2;
        let head = ids.get(..half).unwrap_or_default();
        let tail = ids.get(token_count.saturating_sub(half)..).unwrap_or_default();

        let mut clipped = self.tokenizer.decode(head)?;
        clipped.push_str(&self.tokenizer.decode(tail)?);
        debug!(
            original_tokens = token_count,
            max_tokens, "Truncated prompt to fit context window"
        );
        Ok((clipped, token_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WordTokenizer;

    fn truncator() -> TextBudgetTruncator {
        TextBudgetTruncator::new(Arc::new(WordTokenizer::default()))
    }

    #[test]
    fn text_within_budget_is_returned_unchanged() {
        let truncator = truncator();
        let text = "one two three four";
        let (out, count) = truncator.truncate(text, 4).expect("truncate");
        assert_eq!(out, text);
        assert_eq!(count, 4);

        let (again, again_count) = truncator.truncate(&out, 4).expect("truncate");
        assert_eq!(again, text);
        assert_eq!(again_count, 4);
    }

    #[test]
    fn long_text_keeps_head_and_tail_and_reports_original_count() {
        let truncator = truncator();
        let text = "a b c d e f g h i j";
        let (out, count) = truncator.truncate(text, 5).expect("truncate");
        assert_eq!(count, 10);
        assert_eq!(out, "a b i j");
        assert_eq!(truncator.token_count(&out).expect("count"), 4);
    }

    fn word_level_tokenizer() -> Tokenizer {
        r#"{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {
                    "[UNK]": 0, "a": 1, "b": 2, "c": 3, "d": 4, "e": 5,
                    "f": 6, "g": 7, "h": 8, "i": 9, "j": 10
                },
                "unk_token": "[UNK]"
            }
        }"#
        .parse()
        .expect("tokenizer json")
    }

    #[test]
    fn hugging_face_tokenizer_drives_the_truncator() {
        let tokenizer = word_level_tokenizer();
        assert_eq!(
            ReferenceTokenizer::encode(&tokenizer, "a b c").expect("encode"),
            vec![1, 2, 3]
        );
        assert_eq!(
            ReferenceTokenizer::decode(&tokenizer, &[1, 2, 3]).expect("decode"),
            "a b c"
        );

        let truncator = TextBudgetTruncator::new(Arc::new(tokenizer));
        assert_eq!(truncator.token_count("a b c d").expect("count"), 4);

        let (out, count) = truncator.truncate("a b c d e f g h i j", 5).expect("truncate");
        assert_eq!(count, 10);
        assert_eq!(out, "a bi j");
    }

    #[test]
    fn budget_below_two_yields_empty_text() {
        let truncator = truncator();
        let (out, count) = truncator.truncate("a b c", 1).expect("truncate");
        assert_eq!(out, "");
        assert_eq!(count, 3);
    }
}
