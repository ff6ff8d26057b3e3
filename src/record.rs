//! Records shared by the chunker and the vector indexes.

use serde::{Deserialize, Serialize};

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the originating file, relative to the scanned root.
    pub filename: String,
    /// Zero-based ordinal of the chunk within its file.
    pub chunk_index: usize,
}

/// A chunk produced by the [`Chunker`](crate::chunker::Chunker).
///
/// # Examples
///
/// ```
/// use codesift::record::ChunkRecord;
///
/// let record = ChunkRecord::new("fn main() {}\n", "src/main.rs", 0);
/// assert_eq!(record.metadata.filename, "src/main.rs");
/// assert_eq!(record.metadata.chunk_index, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    pub fn new(
        content: impl Into<String>,
        filename: impl Into<String>,
        chunk_index: usize,
    ) -> Self {
        Self {
            content: content.into(),
            metadata: ChunkMetadata {
                filename: filename.into(),
                chunk_index,
            },
        }
    }
}

/// Whether a backend's scores improve upwards (similarity) or downwards
/// (distance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOrder {
    HigherIsBetter,
    LowerIsBetter,
}

impl ScoreOrder {
    /// Compare two scores so that the better one sorts first.
    pub fn best_first(self, a: f32, b: f32) -> std::cmp::Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
        match self {
            Self::HigherIsBetter => ord.reverse(),
            Self::LowerIsBetter => ord,
        }
    }
}

/// One hit returned by [`VectorIndex::search`](crate::vector_index::VectorIndex::search).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: u64,
    pub content: String,
    pub filename: String,
    pub chunk_index: usize,
    pub score: f32,
}
