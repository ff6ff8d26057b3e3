//! Chunk-then-store pipeline.
//!
//! The chunk stream is read on the calling thread in batches of
//! `batch_size`; each batch is handed to a rayon pool of `workers`
//! threads that embed and store records concurrently. Ids are assigned
//! by the index, never by the workers.

use std::{
    path::Path,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Instant,
};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    chunker::Chunker,
    error::{Error, Result},
    record::ChunkRecord,
    vector_index::VectorIndex,
};

pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Threads embedding and storing records.
    pub workers: usize,
    /// Chunks read from the stream before dispatching to the workers.
    pub batch_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8);
        Self {
            workers,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Outcome of [`index_repo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Records added during this run.
    pub chunks_indexed: u64,
    /// Records in the index after the run.
    pub record_count: u64,
    pub duration_ms: u64,
    /// Whether the run stopped early because `cancel` was set.
    pub cancelled: bool,
}

/// Chunk `root` and add every chunk to `index`.
///
/// `cancel` is checked before every record and every batch; records
/// already added stay added. The index is persisted before returning,
/// after a cancellation too, and on a best-effort basis after an error.
/// `on_progress` receives the running number of records added.
///
/// # Errors
///
/// Returns [`Error::Config`] for zero workers and propagates the first
/// chunking, embedding or storage error.
pub fn index_repo<F>(
    chunker: &Chunker,
    index: &dyn VectorIndex,
    root: &Path,
    options: &PipelineOptions,
    cancel: &AtomicBool,
    on_progress: F,
) -> Result<IndexReport>
where
    F: Fn(u64) + Sync,
{
    if options.workers == 0 {
        return Err(Error::Config("workers must be at least 1".to_string()));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .thread_name(|i| format!("codesift-index-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("failed to start workers: {e}")))?;

    let started = Instant::now();
    let indexed = AtomicU64::new(0);
    let batch_size = options.batch_size.max(1);

    let run = || -> Result<bool> {
        let mut stream = chunker.chunk_repo(root)?;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(true);
            }

            let batch: Vec<ChunkRecord> = stream
                .by_ref()
                .take(batch_size)
                .collect::<Result<_>>()?;
            if batch.is_empty() {
                return Ok(false);
            }

            pool.install(|| {
                batch.par_iter().try_for_each(|record| -> Result<()> {
                    if cancel.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    index.add_record(&record.content, &record.metadata)?;
                    on_progress(indexed.fetch_add(1, Ordering::Relaxed) + 1);
                    Ok(())
                })
            })?;
        }
    };

    let outcome = run();
    let persisted = index.persist();

    let cancelled = match (outcome, persisted) {
        (Ok(cancelled), Ok(())) => cancelled,
        (Ok(_), Err(e)) => return Err(e),
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(persist_error)) => {
            tracing::warn!(error = %persist_error, "persist after failure also failed");
            return Err(e);
        }
    };

    let report = IndexReport {
        chunks_indexed: indexed.load(Ordering::Relaxed),
        record_count: index.record_count()?,
        duration_ms: started.elapsed().as_millis() as u64,
        cancelled,
    };
    tracing::info!(
        chunks = report.chunks_indexed,
        records = report.record_count,
        duration_ms = report.duration_ms,
        cancelled,
        "indexing finished"
    );
    Ok(report)
}
