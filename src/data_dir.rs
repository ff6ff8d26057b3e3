use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    vector_index::BackendKind,
};

pub const DATA_DIR_ENV_VAR: &str = "CODESIFT_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The CODESIFT_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/codesift/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("codesift")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_db(&self) -> PathBuf {
        self.root.join("settings.redb")
    }

    pub fn flat_index(&self) -> PathBuf {
        self.root.join("flat.redb")
    }

    pub fn collection_index(&self) -> PathBuf {
        self.root.join("collection.redb")
    }

    /// Index file used by `backend`.
    pub fn index_file(&self, backend: BackendKind) -> PathBuf {
        match backend {
            BackendKind::Flat => self.flat_index(),
            BackendKind::Collection => self.collection_index(),
        }
    }

    /// Delete both index files. Missing files are fine.
    pub fn remove_indexes(&self) -> Result<()> {
        for path in [self.flat_index(), self.collection_index()] {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "removed index"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
