use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    error::{Error, Result},
    vector_index::BackendKind,
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const BACKEND_KEY: &str = "index.backend";
const MODEL_KEY: &str = "index.model";
const CHUNKING_KEY: &str = "index.chunking";
const ROOT_KEY: &str = "index.root";

/// What an index was built with, kept so later commands reopen it the
/// same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub backend: BackendKind,
    pub model_id: String,
    /// Human-readable chunking summary, e.g. `line size=40 overlap=10`.
    pub chunking: String,
    /// Repository root last indexed.
    pub root: String,
}

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn save_index_settings(&self, settings: &IndexSettings) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(BACKEND_KEY, settings.backend.as_str())?;
            table.insert(MODEL_KEY, settings.model_id.as_str())?;
            table.insert(CHUNKING_KEY, settings.chunking.as_str())?;
            table.insert(ROOT_KEY, settings.root.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Settings of the current index, if one was ever built.
    pub fn index_settings(&self) -> Result<Option<IndexSettings>> {
        let Some(backend) = self.get_setting(BACKEND_KEY)? else {
            return Ok(None);
        };
        let backend: BackendKind = backend.parse()?;

        Ok(Some(IndexSettings {
            backend,
            model_id: self.get_setting_or(MODEL_KEY, backend.default_model())?,
            chunking: self.get_setting_or(CHUNKING_KEY, "")?,
            root: self.get_setting_or(ROOT_KEY, "")?,
        }))
    }

    pub fn clear_index_settings(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            for key in [BACKEND_KEY, MODEL_KEY, CHUNKING_KEY, ROOT_KEY] {
                table.remove(key)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Fail unless a new run with `backend` and `model_id` can add to
    /// the existing index.
    pub fn check_compatible(
        &self,
        backend: BackendKind,
        model_id: &str,
    ) -> Result<()> {
        let Some(existing) = self.index_settings()? else {
            return Ok(());
        };
        if existing.backend != backend || existing.model_id != model_id {
            return Err(Error::Config(format!(
                "index was built with backend {} and model {}; \
                 rerun with --reset to rebuild it with backend {} and model {}",
                existing.backend.as_str(),
                existing.model_id,
                backend.as_str(),
                model_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
