//! `state.redb`: the passage store, the file ledger and the settings the
//! index was built with.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    config::IndexConfig,
    error::{Error, Result},
    ledger::{FileLedger, FileRecord},
    passage::Passage,
    persist::replace_database,
    store::PassageStore,
};

const PASSAGES: TableDefinition<u64, &str> = TableDefinition::new("passages");
const FILES: TableDefinition<&str, &str> = TableDefinition::new("files");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const FORMAT_VERSION: &str = "1";

mod keys {
    pub const FORMAT_VERSION: &str = "format_version";
    pub const BACKEND: &str = "backend";
    pub const CONFIG: &str = "config";
}

/// Read access to a persisted state file.
pub struct StateDb {
    db: Database,
}

impl StateDb {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// Write a complete state file, replacing any previous one atomically.
    pub fn write(
        path: &Path,
        store: &PassageStore,
        ledger: &FileLedger,
        backend: &str,
        config: &IndexConfig,
    ) -> Result<()> {
        replace_database(path, |txn| {
            {
                let mut table = txn.open_table(PASSAGES)?;
                for passage in store.iter() {
                    let json = serde_json::to_string(passage)?;
                    table.insert(passage.id, json.as_str())?;
                }
            }
            {
                let mut table = txn.open_table(FILES)?;
                for (path, record) in ledger.iter() {
                    let json = serde_json::to_string(record)?;
                    table.insert(path, json.as_str())?;
                }
            }
            {
                let config = serde_json::to_string(config)?;
                let mut table = txn.open_table(SETTINGS)?;
                table.insert(keys::FORMAT_VERSION, FORMAT_VERSION)?;
                table.insert(keys::BACKEND, backend)?;
                table.insert(keys::CONFIG, config.as_str())?;
            }
            Ok(())
        })
    }

    fn setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(SETTINGS) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Name of the backend whose state accompanies this file, if the file
    /// was written by a compatible version.
    pub fn backend(&self) -> Result<Option<String>> {
        if self.setting(keys::FORMAT_VERSION)?.as_deref() != Some(FORMAT_VERSION)
        {
            return Ok(None);
        }
        self.setting(keys::BACKEND)
    }

    pub fn config(&self) -> Result<Option<IndexConfig>> {
        self.setting(keys::CONFIG)?
            .map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    pub fn passages(&self) -> Result<PassageStore> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PASSAGES)?;
        let mut passages = Vec::new();
        for entry in table.iter()? {
            let (id, json) = entry?;
            let passage: Passage = serde_json::from_str(json.value())?;
            if passage.id != id.value() {
                return Err(Error::Desync(format!(
                    "passage stored under {} claims id {}",
                    id.value(),
                    passage.id
                )));
            }
            passages.push(passage);
        }
        Ok(passages.into_iter().collect())
    }

    pub fn ledger(&self) -> Result<FileLedger> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (path, json) = entry?;
            let record: FileRecord = serde_json::from_str(json.value())?;
            records.push((path.value().to_string(), record));
        }
        Ok(records.into_iter().collect())
    }
}

impl std::fmt::Debug for StateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDb").finish_non_exhaustive()
    }
}
