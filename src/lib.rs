//! codesift - semantic search over a source tree.
//!
//! codesift cuts source files into overlapping windows (by lines, by
//! characters, or up to a model's token budget), embeds each window and
//! stores it in a vector index. Queries are embedded the same way and
//! answered by nearest-neighbour lookup.
//!
//! Two index backends sit behind the [`VectorIndex`] trait: a flat
//! inner-product index fed by a BERT sentence embedder, and a collection
//! that embeds with a built-in ColBERT model and ranks by cosine
//! distance.
//!
//! # Quick start
//!
//! ```no_run
//! use std::{path::Path, sync::atomic::AtomicBool};
//!
//! use codesift::{
//!     Chunker, ChunkingConfig, ChunkingMode, DataDir, IndexConfig,
//!     PipelineOptions, index_repo, open_index,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let backend = open_index(&IndexConfig::default(), &data_dir).unwrap();
//!
//! let config = ChunkingConfig::new(ChunkingMode::Line, 40, 10);
//! let chunker = Chunker::new(config).unwrap();
//! let cancel = AtomicBool::new(false);
//! index_repo(
//!     &chunker,
//!     backend.index.as_ref(),
//!     Path::new("."),
//!     &PipelineOptions::default(),
//!     &cancel,
//!     |_| {},
//! )
//! .unwrap();
//!
//! for hit in backend.index.search("open a database", 5).unwrap() {
//!     println!("{}#{} ({:.3})", hit.filename, hit.chunk_index, hit.score);
//! }
//! ```

pub mod chunker;
pub mod chunking;
pub mod cli;
pub mod collection_index;
pub mod config_db;
pub mod data_dir;
pub mod embedder;
pub mod encoding;
pub mod error;
pub mod evaluation;
pub mod flat_index;
pub mod model_manager;
pub mod pipeline;
pub mod record;
pub mod search;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use chunker::{ChunkStream, Chunker};
pub use chunking::{ChunkingConfig, ChunkingMode, TrailingLines};
pub use collection_index::CollectionIndex;
pub use config_db::{ConfigDb, IndexSettings};
pub use data_dir::DataDir;
pub use embedder::{BertEmbedder, Embedder, TokenCounter};
pub use error::{Error, Result};
pub use flat_index::FlatIndex;
pub use model_manager::ModelManager;
pub use pipeline::{IndexReport, PipelineOptions, index_repo};
pub use record::{ChunkMetadata, ChunkRecord, ScoreOrder, SearchResult};
pub use vector_index::{
    Backend,
    BackendKind,
    IndexConfig,
    VectorIndex,
    open_index,
};
