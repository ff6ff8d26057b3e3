use std::{
    path::Path,
    sync::{Mutex, RwLock},
};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model_manager::TextEncoder,
    record::{ChunkMetadata, ScoreOrder, SearchResult},
    vector_index::{
        VectorIndex,
        bytes_to_vector,
        cosine_distance,
        top_k,
        vector_bytes,
    },
};

/// Name of the single collection every record goes into.
pub const COLLECTION_NAME: &str = "code_embeddings";

const EMBEDDINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("code_embeddings");
const RECORDS: TableDefinition<&str, &str> =
    TableDefinition::new("code_embeddings_records");
const COLLECTION_META: TableDefinition<&str, &str> =
    TableDefinition::new("collection_meta");

const SPACE_KEY: &str = "space";
const MODEL_KEY: &str = "model";
const SPACE: &str = "cosine";

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    document: String,
    metadata: ChunkMetadata,
}

#[derive(Default)]
struct CollectionState {
    embeddings: Vec<Vec<f32>>,
    records: Vec<StoredRecord>,
}

/// Collection that embeds text itself with a ColBERT model and ranks by
/// cosine distance.
///
/// Records are keyed by their decimal id (`"1"`, `"2"`, ...) and every
/// add is committed before it returns, so [`persist`](VectorIndex::persist)
/// has nothing left to do. The collection remembers the model that
/// built it and refuses to open with another one.
pub struct CollectionIndex {
    db: Database,
    encoder: Mutex<Box<dyn TextEncoder>>,
    state: RwLock<CollectionState>,
}

impl CollectionIndex {
    /// Open or create the collection at `path`, loading the model first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] if the model cannot be loaded and
    /// [`Error::Config`] if the collection was built with another model.
    pub fn open(path: &Path, mut encoder: Box<dyn TextEncoder>) -> Result<Self> {
        encoder.warm_up()?;

        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(EMBEDDINGS)?;
            txn.open_table(RECORDS)?;
            let mut meta = txn.open_table(COLLECTION_META)?;

            let stored_model =
                meta.get(MODEL_KEY)?.map(|v| v.value().to_string());
            match stored_model {
                Some(model) if model != encoder.model_id() => {
                    return Err(Error::Config(format!(
                        "collection {COLLECTION_NAME} was built with {model}, not {}",
                        encoder.model_id()
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert(MODEL_KEY, encoder.model_id())?;
                    meta.insert(SPACE_KEY, SPACE)?;
                }
            }
        }
        txn.commit()?;

        let state = load_state(&db)?;
        tracing::info!(
            path = %path.display(),
            collection = COLLECTION_NAME,
            records = state.records.len(),
            model = encoder.model_id(),
            "opened collection"
        );

        Ok(Self {
            db,
            encoder: Mutex::new(encoder),
            state: RwLock::new(state),
        })
    }

    fn encode(&self, text: &str, is_query: bool) -> Result<Vec<f32>> {
        let mut encoder =
            self.encoder.lock().map_err(|_| Error::poisoned("model"))?;
        if is_query {
            encoder.encode_query(text)
        } else {
            encoder.encode_document(text)
        }
    }
}

/// Records stored at `path`, read without loading a model. Zero when no
/// collection exists there.
pub fn stored_record_count(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let db = Database::open(path)?;
    let txn = db.begin_read()?;
    let records = txn.open_table(RECORDS)?;
    Ok(records.iter()?.count() as u64)
}

fn load_state(db: &Database) -> Result<CollectionState> {
    let txn = db.begin_read()?;
    let embeddings_table = txn.open_table(EMBEDDINGS)?;
    let records_table = txn.open_table(RECORDS)?;

    let mut rows: Vec<(u64, Vec<f32>, StoredRecord)> = Vec::new();
    for entry in embeddings_table.iter()? {
        let (key, bytes) = entry?;
        let key = key.value();
        let id: u64 = key.parse().map_err(|_| {
            Error::CorruptIndex(format!("non-numeric record id {key:?}"))
        })?;
        let record = records_table.get(key)?.ok_or_else(|| {
            Error::CorruptIndex(format!("record {key} has no document"))
        })?;
        let record: StoredRecord = serde_json::from_str(record.value())?;
        rows.push((id, bytes_to_vector(bytes.value())?, record));
    }

    let record_rows = records_table.iter()?.count();
    if record_rows != rows.len() {
        return Err(Error::CorruptIndex(format!(
            "{} embeddings but {record_rows} documents",
            rows.len()
        )));
    }

    rows.sort_by_key(|(id, _, _)| *id);
    let mut state = CollectionState::default();
    for (position, (id, embedding, record)) in rows.into_iter().enumerate() {
        if id != position as u64 + 1 {
            return Err(Error::CorruptIndex(format!(
                "expected id {}, found {id}",
                position + 1
            )));
        }
        state.embeddings.push(embedding);
        state.records.push(record);
    }

    Ok(state)
}

impl VectorIndex for CollectionIndex {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn score_order(&self) -> ScoreOrder {
        ScoreOrder::LowerIsBetter
    }

    fn add_record(&self, content: &str, metadata: &ChunkMetadata) -> Result<u64> {
        let embedding = self.encode(content, false)?;
        let record = StoredRecord {
            document: content.to_string(),
            metadata: metadata.clone(),
        };
        let json = serde_json::to_string(&record)?;

        let mut state =
            self.state.write().map_err(|_| Error::poisoned("collection"))?;
        let id = state.records.len() as u64 + 1;
        let key = id.to_string();

        let txn = self.db.begin_write()?;
        {
            let mut embeddings = txn.open_table(EMBEDDINGS)?;
            let mut records = txn.open_table(RECORDS)?;
            embeddings.insert(key.as_str(), vector_bytes(&embedding))?;
            records.insert(key.as_str(), json.as_str())?;
        }
        txn.commit()?;

        state.embeddings.push(embedding);
        state.records.push(record);
        Ok(id)
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let state =
            self.state.read().map_err(|_| Error::poisoned("collection"))?;
        if state.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let count = state.records.len();
        drop(state);

        let query_vector = self.encode(query, true)?;

        let state =
            self.state.read().map_err(|_| Error::poisoned("collection"))?;
        let scored: Vec<(usize, f32)> = state
            .embeddings
            .par_iter()
            .enumerate()
            .map(|(position, row)| (position, cosine_distance(&query_vector, row)))
            .collect();

        Ok(top_k(scored, ScoreOrder::LowerIsBetter, k.min(count))
            .into_iter()
            .map(|(position, score)| {
                let record = &state.records[position];
                SearchResult {
                    id: position as u64 + 1,
                    content: record.document.clone(),
                    filename: record.metadata.filename.clone(),
                    chunk_index: record.metadata.chunk_index,
                    score,
                }
            })
            .collect())
    }

    fn record_count(&self) -> Result<u64> {
        let state =
            self.state.read().map_err(|_| Error::poisoned("collection"))?;
        Ok(state.records.len() as u64)
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut state =
            self.state.write().map_err(|_| Error::poisoned("collection"))?;

        let txn = self.db.begin_write()?;
        txn.delete_table(EMBEDDINGS)?;
        txn.delete_table(RECORDS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_table(RECORDS)?;
        txn.commit()?;

        *state = CollectionState::default();
        tracing::info!(collection = COLLECTION_NAME, "cleared collection");
        Ok(())
    }
}
