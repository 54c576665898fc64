use std::{collections::HashMap, fs, path::Path};

use common::error::AppError;
use serde::Deserialize;
use tracing::info;

/// Read-only corpus shared by every question of a run: the chunk array the vector
/// index points into, the chunk→parent mapping and the parent documents themselves.
#[derive(Debug, Default)]
pub struct Corpus {
    chunks: Vec<String>,
    chunk_parents: HashMap<usize, String>,
    documents: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_key(self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    paragraph_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocuments {
    Keyed(HashMap<String, RawDocument>),
    Indexed(Vec<RawDocument>),
}

impl RawDocuments {
    fn into_map(self) -> HashMap<String, String> {
        match self {
            Self::Keyed(map) => map
                .into_iter()
                .map(|(id, doc)| (id, doc.paragraph_text))
                .collect(),
            Self::Indexed(list) => list
                .into_iter()
                .enumerate()
                .map(|(idx, doc)| (idx.to_string(), doc.paragraph_text))
                .collect(),
        }
    }
}

impl Corpus {
    pub fn new(
        chunks: Vec<String>,
        chunk_parents: HashMap<usize, String>,
        documents: HashMap<String, String>,
    ) -> Self {
        Self {
            chunks,
            chunk_parents,
            documents,
        }
    }

    /// Loads `chunks.json` and `id_to_rawid.json` from `store_dir` and the raw
    /// documents from `raw_path`.
    pub fn load(store_dir: &Path, raw_path: &Path) -> Result<Self, AppError> {
        let chunks: Vec<String> = read_json(&store_dir.join("chunks.json"))?;
        let raw_parents: HashMap<String, RawId> = read_json(&store_dir.join("id_to_rawid.json"))?;
        let documents: RawDocuments = read_json(raw_path)?;

        let mut chunk_parents = HashMap::with_capacity(raw_parents.len());
        for (chunk_key, raw_id) in raw_parents {
            let chunk_id = chunk_key.parse::<usize>().map_err(|_| {
                AppError::Validation(format!("chunk id '{chunk_key}' is not an integer"))
            })?;
            chunk_parents.insert(chunk_id, raw_id.into_key());
        }

        let corpus = Self::new(chunks, chunk_parents, documents.into_map());
        info!(
            chunks = corpus.chunks.len(),
            documents = corpus.documents.len(),
            store = %store_dir.display(),
            "Loaded corpus"
        );
        Ok(corpus)
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn chunk(&self, chunk_id: usize) -> Result<&str, AppError> {
        self.chunks
            .get(chunk_id)
            .map(String::as_str)
            .ok_or_else(|| AppError::NotFound(format!("chunk {chunk_id}")))
    }

    pub fn parent_id(&self, chunk_id: usize) -> Result<&str, AppError> {
        self.chunk_parents
            .get(&chunk_id)
            .map(String::as_str)
            .ok_or_else(|| AppError::NotFound(format!("parent of chunk {chunk_id}")))
    }

    pub fn parent_text(&self, parent_id: &str) -> Result<&str, AppError> {
        self.documents
            .get(parent_id)
            .map(String::as_str)
            .ok_or_else(|| AppError::NotFound(format!("raw document {parent_id}")))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AppError> {
    let raw = fs::read(path).map_err(|err| {
        AppError::Io(std::io::Error::new(
            err.kind(),
            format!("reading {}: {err}", path.display()),
        ))
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_keyed_and_indexed_layouts() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("chunks.json"),
            r#"["Paris is the capital.", "It lies on the Seine.", "Berlin is in Germany."]"#,
        )
        .expect("chunks");
        fs::write(
            dir.path().join("id_to_rawid.json"),
            r#"{"0": 0, "1": 0, "2": "1"}"#,
        )
        .expect("mapping");
        let raw_path = dir.path().join("raw.json");
        fs::write(
            &raw_path,
            r#"[{"paragraph_text": "Paris is the capital. It lies on the Seine."},
                {"paragraph_text": "Berlin is in Germany."}]"#,
        )
        .expect("raw");

        let corpus = Corpus::load(dir.path(), &raw_path).expect("corpus loads");
        assert_eq!(corpus.chunks().len(), 3);
        assert_eq!(corpus.parent_id(1).expect("parent"), "0");
        assert_eq!(corpus.parent_id(2).expect("parent"), "1");
        assert_eq!(
            corpus.parent_text("1").expect("document"),
            "Berlin is in Germany."
        );

        fs::write(
            &raw_path,
            r#"{"0": {"paragraph_text": "keyed"}, "1": {"paragraph_text": "also keyed"}}"#,
        )
        .expect("raw keyed");
        let corpus = Corpus::load(dir.path(), &raw_path).expect("keyed corpus loads");
        assert_eq!(corpus.parent_text("0").expect("document"), "keyed");
    }

    #[test]
    fn missing_lookups_are_not_found() {
        let corpus = Corpus::default();
        assert!(matches!(corpus.chunk(3), Err(AppError::NotFound(_))));
        assert!(matches!(corpus.parent_id(3), Err(AppError::NotFound(_))));
        assert!(matches!(corpus.parent_text("x"), Err(AppError::NotFound(_))));
    }
}
