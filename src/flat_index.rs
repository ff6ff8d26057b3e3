use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    embedder::Embedder,
    error::{Error, Result},
    record::{ChunkMetadata, ScoreOrder, SearchResult},
    vector_index::{VectorIndex, bytes_to_vector, dot, top_k, vector_bytes},
};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const DOCUMENTS: TableDefinition<u64, &str> = TableDefinition::new("documents");
const METADATA: TableDefinition<u64, &str> = TableDefinition::new("metadata");
const INFO: TableDefinition<&str, u64> = TableDefinition::new("info");

const DIMENSION_KEY: &str = "dimension";

/// Buffered records are written out after this many adds.
pub const DEFAULT_FLUSH_EVERY: usize = 100;

/// Text embedded once to learn the dimensionality of a fresh index.
const PROBE_TEXT: &str = "sample code";

struct FlatState {
    dimension: usize,
    /// Row-major, `dimension` floats per record.
    vectors: Vec<f32>,
    documents: Vec<String>,
    metadatas: Vec<ChunkMetadata>,
    /// Rows `0..persisted` are already in the database.
    persisted: usize,
}

impl FlatState {
    fn len(&self) -> usize {
        self.documents.len()
    }

    fn row(&self, position: usize) -> &[f32] {
        &self.vectors[position * self.dimension..(position + 1) * self.dimension]
    }

    /// Drop the newest buffered record.
    fn pop_unpersisted(&mut self) {
        if self.len() > self.persisted {
            self.vectors.truncate((self.len() - 1) * self.dimension);
            self.documents.pop();
            self.metadatas.pop();
        }
    }
}

/// Exact inner-product index over externally computed embeddings.
///
/// Vectors, documents and metadata live in memory as three parallel
/// lists and in one redb file as three tables keyed by the same id.
/// Record `n` (1-based) sits at position `n - 1` in every list. New
/// records are buffered and written every `flush_every` adds, or on
/// [`persist`](VectorIndex::persist).
pub struct FlatIndex {
    db: Database,
    embedder: Arc<dyn Embedder>,
    flush_every: usize,
    state: RwLock<FlatState>,
    #[cfg(test)]
    fail_flushes: std::sync::atomic::AtomicBool,
}

impl FlatIndex {
    /// Open the index at `path`, reloading any persisted records.
    ///
    /// A fresh index learns its dimensionality from one embedding call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if the persisted tables are out of
    /// lock-step, and propagates storage and embedding failures.
    pub fn open(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        flush_every: usize,
    ) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(METADATA)?;
        txn.open_table(INFO)?;
        txn.commit()?;

        let stored_dimension = {
            let txn = db.begin_read()?;
            let info = txn.open_table(INFO)?;
            info.get(DIMENSION_KEY)?.map(|v| v.value() as usize)
        };

        let dimension = match stored_dimension {
            Some(dimension) => dimension,
            None => {
                let dimension = embedder.embed(PROBE_TEXT)?.len();
                let txn = db.begin_write()?;
                {
                    let mut info = txn.open_table(INFO)?;
                    info.insert(DIMENSION_KEY, dimension as u64)?;
                }
                txn.commit()?;
                dimension
            }
        };

        if dimension == 0 {
            return Err(Error::Model(format!(
                "{} produced an empty embedding",
                embedder.model_name()
            )));
        }

        let state = load_state(&db, dimension)?;
        tracing::info!(
            path = %path.display(),
            records = state.len(),
            dimension,
            "opened flat index"
        );

        Ok(Self {
            db,
            embedder,
            flush_every: flush_every.max(1),
            state: RwLock::new(state),
            #[cfg(test)]
            fail_flushes: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn dimension(&self) -> Result<usize> {
        let state = self.state.read().map_err(|_| Error::poisoned("index"))?;
        Ok(state.dimension)
    }

    /// Records already written to the database.
    pub fn persisted_count(&self) -> Result<u64> {
        let state = self.state.read().map_err(|_| Error::poisoned("index"))?;
        Ok(state.persisted as u64)
    }

    #[cfg(test)]
    fn injected_flush_failure(&self) -> Result<()> {
        if self.fail_flushes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("flush disabled")));
        }
        Ok(())
    }

    fn flush(&self, state: &mut FlatState) -> Result<()> {
        if state.persisted == state.len() {
            return Ok(());
        }

        #[cfg(test)]
        self.injected_flush_failure()?;

        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut metadata = txn.open_table(METADATA)?;

            for position in state.persisted..state.len() {
                let id = position as u64 + 1;
                vectors.insert(id, vector_bytes(state.row(position)))?;
                documents.insert(id, state.documents[position].as_str())?;
                let json = serde_json::to_string(&state.metadatas[position])?;
                metadata.insert(id, json.as_str())?;
            }
        }
        txn.commit()?;

        tracing::debug!(
            from = state.persisted + 1,
            to = state.len(),
            "flushed flat index"
        );
        state.persisted = state.len();
        Ok(())
    }
}

/// Records persisted at `path`, read without loading a model. Zero
/// when no index exists there.
pub fn stored_record_count(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let db = Database::open(path)?;
    let txn = db.begin_read()?;
    let documents = txn.open_table(DOCUMENTS)?;
    Ok(documents.iter()?.count() as u64)
}

fn load_state(db: &Database, dimension: usize) -> Result<FlatState> {
    let txn = db.begin_read()?;
    let vector_table = txn.open_table(VECTORS)?;
    let document_table = txn.open_table(DOCUMENTS)?;
    let metadata_table = txn.open_table(METADATA)?;

    let mut vectors = Vec::new();
    for (position, entry) in vector_table.iter()?.enumerate() {
        let (id, bytes) = entry?;
        expect_id(id.value(), position, "vectors")?;
        let row = bytes_to_vector(bytes.value())?;
        if row.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: row.len(),
            });
        }
        vectors.extend_from_slice(&row);
    }

    let mut documents = Vec::new();
    for (position, entry) in document_table.iter()?.enumerate() {
        let (id, text) = entry?;
        expect_id(id.value(), position, "documents")?;
        documents.push(text.value().to_string());
    }

    let mut metadatas = Vec::new();
    for (position, entry) in metadata_table.iter()?.enumerate() {
        let (id, json) = entry?;
        expect_id(id.value(), position, "metadata")?;
        metadatas.push(serde_json::from_str::<ChunkMetadata>(json.value())?);
    }

    let rows = vectors.len() / dimension;
    if rows != documents.len() || rows != metadatas.len() {
        return Err(Error::CorruptIndex(format!(
            "{rows} vectors, {} documents and {} metadata rows",
            documents.len(),
            metadatas.len()
        )));
    }

    Ok(FlatState {
        dimension,
        vectors,
        documents,
        metadatas,
        persisted: rows,
    })
}

fn expect_id(id: u64, position: usize, table: &str) -> Result<()> {
    if id != position as u64 + 1 {
        return Err(Error::CorruptIndex(format!(
            "{table} table has id {id} at position {position}"
        )));
    }
    Ok(())
}

impl VectorIndex for FlatIndex {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn score_order(&self) -> ScoreOrder {
        ScoreOrder::HigherIsBetter
    }

    fn add_record(&self, content: &str, metadata: &ChunkMetadata) -> Result<u64> {
        let embedding = self.embedder.embed(content)?;

        let mut state =
            self.state.write().map_err(|_| Error::poisoned("index"))?;
        if embedding.len() != state.dimension {
            return Err(Error::DimensionMismatch {
                expected: state.dimension,
                actual: embedding.len(),
            });
        }

        state.vectors.extend_from_slice(&embedding);
        state.documents.push(content.to_string());
        state.metadatas.push(metadata.clone());
        let id = state.len() as u64;

        // A record is only acknowledged if the flush it triggers lands.
        if state.len() - state.persisted >= self.flush_every
            && let Err(e) = self.flush(&mut state)
        {
            state.pop_unpersisted();
            return Err(e);
        }

        Ok(id)
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let query_vector = self.embedder.embed(query)?;

        let state = self.state.read().map_err(|_| Error::poisoned("index"))?;
        if state.len() == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != state.dimension {
            return Err(Error::DimensionMismatch {
                expected: state.dimension,
                actual: query_vector.len(),
            });
        }

        let scored: Vec<(usize, f32)> = state
            .vectors
            .par_chunks_exact(state.dimension)
            .enumerate()
            .map(|(position, row)| (position, dot(&query_vector, row)))
            .collect();

        let k = k.min(state.len());
        Ok(top_k(scored, ScoreOrder::HigherIsBetter, k)
            .into_iter()
            .map(|(position, score)| SearchResult {
                id: position as u64 + 1,
                content: state.documents[position].clone(),
                filename: state.metadatas[position].filename.clone(),
                chunk_index: state.metadatas[position].chunk_index,
                score,
            })
            .collect())
    }

    fn record_count(&self) -> Result<u64> {
        let state = self.state.read().map_err(|_| Error::poisoned("index"))?;
        Ok(state.len() as u64)
    }

    fn persist(&self) -> Result<()> {
        let mut state =
            self.state.write().map_err(|_| Error::poisoned("index"))?;
        self.flush(&mut state)
    }

    fn clear(&self) -> Result<()> {
        let mut state =
            self.state.write().map_err(|_| Error::poisoned("index"))?;

        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(DOCUMENTS)?;
        txn.delete_table(METADATA)?;
        txn.open_table(VECTORS)?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(METADATA)?;
        txn.commit()?;

        state.vectors.clear();
        state.documents.clear();
        state.metadatas.clear();
        state.persisted = 0;

        tracing::info!(dimension = state.dimension, "cleared flat index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::fake::HashEmbedder;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(HashEmbedder::default())
    }

    fn meta(filename: &str, chunk_index: usize) -> ChunkMetadata {
        ChunkMetadata {
            filename: filename.to_string(),
            chunk_index,
        }
    }

    #[test]
    fn fresh_index_infers_dimension() {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder(), 100)
                .unwrap();
        assert_eq!(index.dimension().unwrap(), 16);
        assert_eq!(index.record_count().unwrap(), 0);
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder(), 100)
                .unwrap();
        assert_eq!(index.add_record("a", &meta("a.py", 0)).unwrap(), 1);
        assert_eq!(index.add_record("a", &meta("a.py", 0)).unwrap(), 2);
        assert_eq!(index.record_count().unwrap(), 2);
    }

    #[test]
    fn failed_flush_forgets_the_triggering_record() {
        use std::sync::atomic::Ordering;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flat.redb");
        {
            let index = FlatIndex::open(&path, embedder(), 1).unwrap();
            index.add_record("kept", &meta("a.rs", 0)).unwrap();

            index.fail_flushes.store(true, Ordering::SeqCst);
            assert!(matches!(
                index.add_record("rejected", &meta("b.rs", 0)),
                Err(Error::Io(_))
            ));
            assert_eq!(index.record_count().unwrap(), 1);

            index.fail_flushes.store(false, Ordering::SeqCst);
            index.persist().unwrap();
            assert_eq!(index.persisted_count().unwrap(), 1);
            assert_eq!(index.add_record("retried", &meta("b.rs", 0)).unwrap(), 2);
        }

        let index = FlatIndex::open(&path, embedder(), 1).unwrap();
        assert_eq!(index.record_count().unwrap(), 2);
        let documents: Vec<String> = index
            .search("kept", 10)
            .unwrap()
            .into_iter()
            .map(|hit| hit.content)
            .collect();
        assert!(documents.contains(&"retried".to_string()));
        assert!(!documents.contains(&"rejected".to_string()));
    }

    #[test]
    fn failed_flush_keeps_earlier_buffered_records() {
        use std::sync::atomic::Ordering;

        let tmp = tempfile::tempdir().unwrap();
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder(), 2)
                .unwrap();
        index.add_record("one", &meta("a.rs", 0)).unwrap();

        index.fail_flushes.store(true, Ordering::SeqCst);
        assert!(index.add_record("two", &meta("a.rs", 1)).is_err());
        assert_eq!(index.record_count().unwrap(), 1);
        assert_eq!(index.persisted_count().unwrap(), 0);

        index.fail_flushes.store(false, Ordering::SeqCst);
        index.persist().unwrap();
        assert_eq!(index.persisted_count().unwrap(), 1);
    }

    #[test]
    fn search_on_empty_index_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder(), 100)
                .unwrap();
        assert!(index.search("anything", 10).unwrap().is_empty());
    }

    #[test]
    fn search_clamps_k_and_ranks_best_first() {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder(), 100)
                .unwrap();
        index
            .add_record("parse config file", &meta("config.py", 0))
            .unwrap();
        index
            .add_record("render html template", &meta("view.py", 0))
            .unwrap();
        index.add_record("open socket", &meta("net.py", 0)).unwrap();

        let results = index.search("parse config file", 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].filename, "config.py");
        assert_eq!(results[0].id, 1);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn periodic_flush_without_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flat.redb");
        {
            let index = FlatIndex::open(&path, embedder(), 2).unwrap();
            for i in 0..5 {
                index
                    .add_record(&format!("chunk {i}"), &meta("f.rs", i))
                    .unwrap();
            }
            assert_eq!(index.record_count().unwrap(), 5);
            assert_eq!(index.persisted_count().unwrap(), 4);
        }

        let index = FlatIndex::open(&path, embedder(), 2).unwrap();
        assert_eq!(index.record_count().unwrap(), 4);
        assert_eq!(index.add_record("next", &meta("f.rs", 5)).unwrap(), 5);
    }

    #[test]
    fn reload_restores_records_and_ordering() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flat.redb");
        let texts = ["alpha beta", "beta gamma", "gamma delta", "delta alpha"];

        let before = {
            let index = FlatIndex::open(&path, embedder(), 100).unwrap();
            for (i, text) in texts.iter().enumerate() {
                index.add_record(text, &meta("g.go", i)).unwrap();
            }
            index.persist().unwrap();
            index.persist().unwrap();
            index.search("alpha gamma", 3).unwrap()
        };

        let index = FlatIndex::open(&path, embedder(), 100).unwrap();
        assert_eq!(index.record_count().unwrap(), 4);
        assert_eq!(index.search("alpha gamma", 3).unwrap(), before);
    }

    #[test]
    fn clear_keeps_dimension_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flat.redb");
        {
            let index = FlatIndex::open(&path, embedder(), 100).unwrap();
            index.add_record("x", &meta("x.c", 0)).unwrap();
            index.persist().unwrap();
            index.clear().unwrap();
            assert_eq!(index.record_count().unwrap(), 0);
            assert!(index.search("x", 5).unwrap().is_empty());
        }

        let index = FlatIndex::open(&path, embedder(), 100).unwrap();
        assert_eq!(index.record_count().unwrap(), 0);
        assert_eq!(index.dimension().unwrap(), 16);
        assert_eq!(index.add_record("y", &meta("y.c", 0)).unwrap(), 1);
    }

    #[test]
    fn stored_count_reads_without_model() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flat.redb");
        assert_eq!(stored_record_count(&path).unwrap(), 0);
        {
            let index = FlatIndex::open(&path, embedder(), 100).unwrap();
            index.add_record("a", &meta("a.rs", 0)).unwrap();
            index.add_record("b", &meta("b.rs", 0)).unwrap();
            index.persist().unwrap();
        }
        assert_eq!(stored_record_count(&path).unwrap(), 2);
    }

    #[test]
    fn dimension_change_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flat.redb");
        drop(FlatIndex::open(&path, embedder(), 100).unwrap());

        let wider: Arc<dyn Embedder> = Arc::new(HashEmbedder { dimension: 32 });
        let index = FlatIndex::open(&path, wider, 100).unwrap();
        assert!(matches!(
            index.add_record("z", &meta("z.c", 0)),
            Err(Error::DimensionMismatch {
                expected: 16,
                actual: 32
            })
        ));
    }

    #[test]
    fn concurrent_adds_get_distinct_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            FlatIndex::open(&tmp.path().join("flat.redb"), embedder(), 7)
                .unwrap();

        let mut ids: Vec<u64> = (0..64)
            .into_par_iter()
            .map(|i| {
                index
                    .add_record(&format!("record {i}"), &meta("p.rs", i))
                    .unwrap()
            })
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=64).collect::<Vec<u64>>());
        index.persist().unwrap();
        assert_eq!(index.persisted_count().unwrap(), 64);
    }
}
