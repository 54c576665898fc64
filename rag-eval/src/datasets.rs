use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::args::DatasetKind;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EvalQuestion {
    pub question: String,
    #[serde(default)]
    pub answers: Vec<String>,
}

pub fn questions_path(data_dir: &Path, dataset: DatasetKind) -> PathBuf {
    data_dir.join("eval").join(format!("{}.json", dataset.id()))
}

pub fn raw_corpus_path(data_dir: &Path, dataset: DatasetKind) -> PathBuf {
    data_dir
        .join("corpus")
        .join("raw")
        .join(format!("{}.json", dataset.id()))
}

/// Loads the evaluation set, keeping the first `limit` questions when non-zero.
pub fn load_questions(path: &Path, limit: usize) -> Result<Vec<EvalQuestion>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("reading evaluation set {}", path.display()))?;
    let mut questions: Vec<EvalQuestion> = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing evaluation set {}", path.display()))?;
    if limit > 0 {
        questions.truncate(limit);
    }
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_limits_questions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = questions_path(dir.path(), DatasetKind::Musique);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(
            &path,
            r#"[
                {"question": "Who wrote Hamlet?", "answers": ["Shakespeare", "William Shakespeare"], "level": "easy"},
                {"question": "Capital of France?", "answers": ["Paris"]},
                {"question": "No gold"}
            ]"#,
        )
        .expect("write");

        let all = load_questions(&path, 0).expect("load");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].answers.len(), 2);
        assert!(all[2].answers.is_empty());

        let limited = load_questions(&path, 2).expect("load");
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].question, "Capital of France?");
    }

    #[test]
    fn paths_follow_data_layout() {
        let root = Path::new("/data");
        assert_eq!(
            raw_corpus_path(root, DatasetKind::HotpotQa),
            PathBuf::from("/data/corpus/raw/hotpotqa.json")
        );
        assert_eq!(
            questions_path(root, DatasetKind::TwoWikiMultihopQa),
            PathBuf::from("/data/eval/2wikimultihopqa.json")
        );
    }
}
