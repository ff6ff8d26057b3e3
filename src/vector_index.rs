//! Backend-agnostic vector index contract.
//!
//! Two backends implement [`VectorIndex`]:
//!
//! | Backend | Embedding | Score |
//! |---------|-----------|-------|
//! | [`FlatIndex`](crate::flat_index::FlatIndex) | injected [`Embedder`] | inner product, higher is better |
//! | [`CollectionIndex`](crate::collection_index::CollectionIndex) | owned ColBERT model | cosine distance, lower is better |
//!
//! Both assign ids `1, 2, 3, ...` under their own write lock, so callers
//! may add records from several threads.

use std::{str::FromStr, sync::Arc};

use crate::{
    collection_index::CollectionIndex,
    data_dir::DataDir,
    embedder::{
        BertEmbedder,
        DEFAULT_EMBEDDING_MODEL,
        Embedder,
        HubTokenizer,
        TokenCounter,
    },
    error::{Error, Result},
    flat_index::{DEFAULT_FLUSH_EVERY, FlatIndex},
    model_manager::{DEFAULT_MODEL_ID, ModelManager, resolve_model_id},
    record::{ChunkMetadata, ScoreOrder, SearchResult},
};

/// Storage and search over chunk records.
pub trait VectorIndex: Send + Sync {
    /// Short backend name, as persisted in settings.
    fn name(&self) -> &'static str;

    /// Direction in which [`SearchResult::score`] improves.
    fn score_order(&self) -> ScoreOrder;

    /// Store one record and return its id. Identical records are stored
    /// again under a new id.
    fn add_record(&self, content: &str, metadata: &ChunkMetadata) -> Result<u64>;

    /// Up to `k` results, best first. Empty for an empty index.
    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>>;

    /// Records committed or buffered so far.
    fn record_count(&self) -> Result<u64>;

    /// Write buffered records to durable storage. Idempotent.
    fn persist(&self) -> Result<()>;

    /// Drop every record, keeping the dimensionality or metric, and
    /// persist the empty state.
    fn clear(&self) -> Result<()>;
}

/// Which [`VectorIndex`] implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Externally embedded vectors, exact inner-product search.
    #[default]
    Flat,
    /// Built-in ColBERT embeddings, cosine distance.
    Collection,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Collection => "collection",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Flat => DEFAULT_EMBEDDING_MODEL,
            Self::Collection => DEFAULT_MODEL_ID,
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flat" => Ok(Self::Flat),
            "collection" => Ok(Self::Collection),
            other => Err(Error::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// How to open an index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub backend: BackendKind,
    /// Model id; `CODESIFT_MODEL` or the backend default when `None`.
    pub model_id: Option<String>,
    /// Flat backend: flush after this many buffered records.
    pub flush_every: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model_id: None,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

impl IndexConfig {
    pub fn resolved_model_id(&self) -> String {
        resolve_model_id(self.model_id.as_deref(), self.backend.default_model())
    }
}

/// An opened index together with what it was opened with.
pub struct Backend {
    pub index: Arc<dyn VectorIndex>,
    pub kind: BackendKind,
    pub model_id: String,
    embedder: Option<Arc<BertEmbedder>>,
}

impl Backend {
    /// Token counter matching the backend's model, for token-budget
    /// chunking. Reuses the flat backend's embedder when there is one.
    pub fn token_counter(&self) -> Result<Arc<dyn TokenCounter>> {
        match &self.embedder {
            Some(embedder) => Ok(embedder.clone()),
            None => Ok(Arc::new(HubTokenizer::from_pretrained(&self.model_id)?)),
        }
    }
}

/// Open the configured backend under `data_dir`, loading its model.
///
/// # Errors
///
/// Fails if the model cannot be loaded or the store cannot be opened.
pub fn open_index(config: &IndexConfig, data_dir: &DataDir) -> Result<Backend> {
    let model_id = config.resolved_model_id();
    tracing::debug!(backend = config.backend.as_str(), model = %model_id, "opening index");

    match config.backend {
        BackendKind::Flat => {
            let embedder = Arc::new(BertEmbedder::load(&model_id)?);
            let index = FlatIndex::open(
                &data_dir.flat_index(),
                embedder.clone() as Arc<dyn Embedder>,
                config.flush_every,
            )?;
            Ok(Backend {
                index: Arc::new(index),
                kind: config.backend,
                model_id,
                embedder: Some(embedder),
            })
        }
        BackendKind::Collection => {
            let encoder = ModelManager::with_model_id(model_id.clone());
            let index = CollectionIndex::open(
                &data_dir.collection_index(),
                Box::new(encoder),
            )?;
            Ok(Backend {
                index: Arc::new(index),
                kind: config.backend,
                model_id,
                embedder: None,
            })
        }
    }
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `1 - cos(a, b)`; 1.0 when either vector is zero.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        return 1.0;
    }
    1.0 - dot(a, b) / (mag_a * mag_b)
}

/// Native-endian bytes of a vector, for storage.
pub(crate) fn vector_bytes(v: &[f32]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Inverse of [`vector_bytes`]. Works on unaligned input.
pub(crate) fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % size_of::<f32>() != 0 {
        return Err(Error::CorruptIndex(format!(
            "vector blob of {} bytes is not a whole number of f32s",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect())
}

/// Sort `(position, score)` pairs best first and keep the top `k`.
pub(crate) fn top_k(
    mut scored: Vec<(usize, f32)>,
    order: ScoreOrder,
    k: usize,
) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| order.best_first(a.1, b.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for kind in [BackendKind::Flat, BackendKind::Collection] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("faiss".parse::<BackendKind>().is_err());
    }

    #[test]
    fn normalize_skips_zero_vectors() {
        let mut zero = vec![0.0; 3];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);

        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn vector_bytes_survive_unaligned_reads() {
        let v = vec![1.5f32, -2.0, 0.25];
        let mut buf = vec![0u8];
        buf.extend_from_slice(vector_bytes(&v));
        assert_eq!(bytes_to_vector(&buf[1..]).unwrap(), v);
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        assert!(matches!(
            bytes_to_vector(&[0, 1, 2]),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn top_k_orders_and_clamps() {
        let scored = vec![(0, 0.2), (1, 0.9), (2, 0.5)];
        assert_eq!(
            top_k(scored.clone(), ScoreOrder::HigherIsBetter, 10),
            vec![(1, 0.9), (2, 0.5), (0, 0.2)]
        );
        assert_eq!(
            top_k(scored, ScoreOrder::LowerIsBetter, 2),
            vec![(0, 0.2), (2, 0.5)]
        );
    }
}
