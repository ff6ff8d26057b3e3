use std::{path::Path, sync::Arc};

use crate::{
    chunking::{self, ChunkingConfig, ChunkingMode},
    embedder::TokenCounter,
    encoding::{decode_file, decode_file_strict},
    error::{Error, Result},
    record::ChunkRecord,
    walker::{DiscoveredFile, FileFilter, discover_files},
};

/// Turns a source tree into a stream of [`ChunkRecord`]s.
pub struct Chunker {
    config: ChunkingConfig,
    filter: FileFilter,
    counter: Option<Arc<dyn TokenCounter>>,
}

impl Chunker {
    /// Build a chunker for line or char mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for token-budget mode, which needs a
    /// token counter (see [`Chunker::with_token_counter`]), or for an
    /// invalid exclude glob.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.mode() == ChunkingMode::TokenBudget {
            return Err(Error::Config(
                "token-budget chunking needs a token counter".to_string(),
            ));
        }
        Self::build(config, None)
    }

    pub fn with_token_counter(
        config: ChunkingConfig,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        Self::build(config, Some(counter))
    }

    fn build(
        config: ChunkingConfig,
        counter: Option<Arc<dyn TokenCounter>>,
    ) -> Result<Self> {
        let filter =
            FileFilter::new(config.include_all_files(), config.exclude())?;
        Ok(Self {
            config,
            filter,
            counter,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Lazily chunk every admitted file under `root`.
    ///
    /// The directory listing happens now; files are read and chunked one
    /// at a time as the stream is consumed. A missing `root` yields an
    /// empty stream. Calling this again walks the tree again.
    pub fn chunk_repo(&self, root: &Path) -> Result<ChunkStream<'_>> {
        let files = if root.exists() {
            discover_files(root, &self.filter)?
        } else {
            tracing::warn!(root = %root.display(), "repository path does not exist");
            Vec::new()
        };
        tracing::debug!(files = files.len(), "discovered files");

        Ok(ChunkStream {
            chunker: self,
            files: files.into_iter(),
            pending: Vec::new().into_iter(),
            failed: false,
        })
    }

    /// Chunk the whole tree into memory.
    pub fn collect_repo(&self, root: &Path) -> Result<Vec<ChunkRecord>> {
        self.chunk_repo(root)?.collect()
    }

    /// Read, decode and chunk one file.
    pub fn chunk_file(&self, file: &DiscoveredFile) -> Result<Vec<ChunkRecord>> {
        let bytes = std::fs::read(&file.absolute_path)?;
        let (path, hint) = (&file.absolute_path, self.config.encoding());
        let text = if self.config.encoding_detection() {
            decode_file(path, &bytes, hint)?
        } else {
            decode_file_strict(path, &bytes, hint)?
        };
        let records = self.chunk_text(&text, &file.display_name())?;
        tracing::trace!(file = %file.display_name(), chunks = records.len(), "chunked");
        Ok(records)
    }

    /// Chunk already decoded text as if it came from `filename`.
    pub fn chunk_text(
        &self,
        text: &str,
        filename: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let chunks = match self.config.mode() {
            ChunkingMode::Line => {
                chunking::chunk_lines(text, filename, &self.config)
            }
            ChunkingMode::Char => {
                chunking::chunk_chars(text, filename, &self.config)
            }
            ChunkingMode::TokenBudget => {
                let counter = self.counter.as_deref().ok_or_else(|| {
                    Error::Config(
                        "token-budget chunking needs a token counter"
                            .to_string(),
                    )
                })?;
                chunking::chunk_tokens(
                    text,
                    filename,
                    self.config.size(),
                    counter,
                )?
            }
        };

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| {
                ChunkRecord::new(content, filename, chunk_index)
            })
            .collect())
    }
}

/// Finite, non-restartable sequence of chunks produced by
/// [`Chunker::chunk_repo`].
///
/// Yields one `Err` and then ends if a file cannot be read or decoded.
pub struct ChunkStream<'a> {
    chunker: &'a Chunker,
    files: std::vec::IntoIter<DiscoveredFile>,
    pending: std::vec::IntoIter<ChunkRecord>,
    failed: bool,
}

impl ChunkStream<'_> {
    /// Files not yet opened.
    pub fn remaining_files(&self) -> usize {
        self.files.len()
    }
}

impl Iterator for ChunkStream<'_> {
    type Item = Result<ChunkRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(record) = self.pending.next() {
                return Some(Ok(record));
            }

            let file = self.files.next()?;
            match self.chunker.chunk_file(&file) {
                Ok(records) => self.pending = records.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for ChunkStream<'_> {}
