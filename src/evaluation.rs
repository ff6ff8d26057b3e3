//! Retrieval quality over a set of question/expected-files cases.
//!
//! The case file is a JSON array:
//!
//! ```json
//! [{"question": "Where is the config parsed?", "files": ["src/config.rs"]}]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{error::Result, vector_index::VectorIndex};

pub const DEFAULT_K: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub question: String,
    /// Relevant files, as relative paths or bare file names.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub question: String,
    pub expected: Vec<String>,
    pub retrieved: Vec<String>,
    pub recall: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub k: usize,
    pub cases: Vec<CaseOutcome>,
    pub mean_recall: f64,
}

pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn same_file(retrieved: &str, relevant: &str) -> bool {
    if relevant.contains('/') {
        retrieved == relevant
    } else {
        base_name(retrieved) == relevant
    }
}

/// Fraction of the relevant files found among the first `k` retrieved
/// files, out of `min(|relevant|, k)`.
///
/// A relevant entry without a `/` matches any retrieved file with that
/// file name.
///
/// # Examples
///
/// ```
/// use codesift::evaluation::recall_at_k;
///
/// let retrieved = vec!["src/a.rs".to_string(), "src/b.rs".to_string()];
/// let relevant = vec!["a.rs".to_string(), "src/c.rs".to_string()];
/// assert_eq!(recall_at_k(&retrieved, &relevant, 10), 0.5);
/// ```
pub fn recall_at_k(retrieved: &[String], relevant: &[String], k: usize) -> f64 {
    let denominator = relevant.len().min(k);
    if denominator == 0 {
        return 0.0;
    }

    let window = &retrieved[..retrieved.len().min(k)];
    let hits = relevant
        .iter()
        .filter(|rel| window.iter().any(|r| same_file(r, rel)))
        .count();

    (hits as f64 / denominator as f64).min(1.0)
}

/// Run every case against `index`, retrieving `k` chunks per question.
pub fn evaluate(
    index: &dyn VectorIndex,
    cases: &[TestCase],
    k: usize,
) -> Result<EvaluationReport> {
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let mut retrieved: Vec<String> = Vec::new();
        for hit in index.search(&case.question, k)? {
            if !retrieved.contains(&hit.filename) {
                retrieved.push(hit.filename);
            }
        }

        let recall = recall_at_k(&retrieved, &case.files, k);
        tracing::debug!(question = %case.question, recall, "evaluated case");
        outcomes.push(CaseOutcome {
            question: case.question.clone(),
            expected: case.files.clone(),
            retrieved,
            recall,
        });
    }

    let mean_recall = if outcomes.is_empty() {
        0.0
    } else {
        outcomes.iter().map(|o| o.recall).sum::<f64>() / outcomes.len() as f64
    };

    Ok(EvaluationReport {
        k,
        cases: outcomes,
        mean_recall,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        embedder::{Embedder, fake::HashEmbedder},
        flat_index::FlatIndex,
        record::ChunkMetadata,
    };

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recall_counts_hits_over_smaller_of_relevant_and_k() {
        let retrieved = strings(&["a.py", "b.py", "c.py"]);
        assert_eq!(recall_at_k(&retrieved, &strings(&["a.py", "c.py"]), 10), 1.0);
        assert_eq!(recall_at_k(&retrieved, &strings(&["c.py"]), 2), 0.0);
        assert_eq!(
            recall_at_k(&retrieved, &strings(&["a.py", "b.py", "z.py"]), 2),
            1.0
        );
    }

    #[test]
    fn empty_relevant_set_scores_zero() {
        assert_eq!(recall_at_k(&strings(&["a.py"]), &[], 10), 0.0);
    }

    #[test]
    fn full_paths_must_match_exactly() {
        let retrieved = strings(&["lib/util.js"]);
        assert_eq!(recall_at_k(&retrieved, &strings(&["src/util.js"]), 5), 0.0);
        assert_eq!(recall_at_k(&retrieved, &strings(&["util.js"]), 5), 1.0);
    }

    #[test]
    fn cases_parse_from_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cases.json");
        std::fs::write(
            &path,
            r#"[{"question": "how are users stored?", "files": ["db.py"]}]"#,
        )
        .unwrap();
        let cases = load_test_cases(&path).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].files, vec!["db.py"]);
    }

    #[test]
    fn evaluate_dedupes_filenames() {
        let tmp = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder, 100)
                .unwrap();
        for (i, text) in ["store user rows", "store user index", "draw button"]
            .iter()
            .enumerate()
        {
            let filename = if i < 2 { "app/db.py" } else { "ui/view.py" };
            index
                .add_record(
                    text,
                    &ChunkMetadata {
                        filename: filename.to_string(),
                        chunk_index: i,
                    },
                )
                .unwrap();
        }

        let cases = vec![TestCase {
            question: "store user rows".to_string(),
            files: strings(&["db.py"]),
        }];
        let report = evaluate(&index, &cases, 3).unwrap();
        assert_eq!(report.cases[0].retrieved.len(), 2);
        assert_eq!(report.cases[0].retrieved[0], "app/db.py");
        assert_eq!(report.mean_recall, 1.0);
    }
}
