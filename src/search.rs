use serde::Serialize;

use crate::{
    error::Result,
    record::ScoreOrder,
    text_util::{indent, preview, strip_filename_header},
    vector_index::VectorIndex,
};

/// A search hit with its 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub rank: usize,
    pub score: f32,
    pub id: u64,
    pub filename: String,
    pub chunk_index: usize,
    pub content: String,
}

/// Run `query` against `index` and number the hits.
pub fn execute_search(
    index: &dyn VectorIndex,
    query: &str,
    count: usize,
) -> Result<Vec<RankedResult>> {
    let hits = index.search(query, count)?;
    tracing::debug!(query, hits = hits.len(), backend = index.name(), "searched");

    Ok(hits
        .into_iter()
        .enumerate()
        .map(|(i, hit)| RankedResult {
            rank: i + 1,
            score: hit.score,
            id: hit.id,
            filename: hit.filename,
            chunk_index: hit.chunk_index,
            content: hit.content,
        })
        .collect())
}

/// Render results for a terminal.
pub fn format_human(
    results: &[RankedResult],
    query: &str,
    order: ScoreOrder,
) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let label = match order {
        ScoreOrder::HigherIsBetter => "similarity",
        ScoreOrder::LowerIsBetter => "distance",
    };

    let mut out = String::new();
    for r in results {
        out.push_str(&format!(
            "{:>3}. [{label} {:.3}] {} (chunk {})\n",
            r.rank, r.score, r.filename, r.chunk_index
        ));
        let body = strip_filename_header(&r.content, &r.filename);
        if let Some((excerpt, _)) = preview(body, query) {
            out.push_str(&indent(&excerpt, "     | "));
            out.push('\n');
        }
    }
    out.push_str(&format!("\n{} result(s)", results.len()));
    out
}

/// Render results as a JSON document.
pub fn format_json(
    results: &[RankedResult],
    query: &str,
    order: ScoreOrder,
) -> Result<String> {
    Ok(serde_json::to_string_pretty(&serde_json::json!({
        "query": query,
        "score_order": order,
        "result_count": results.len(),
        "results": results,
    }))?)
}
