//! The retrieval index: passages, the file ledger and one search backend,
//! kept in step with a folder of documentation.
//!
//! Each backend keeps its state in its own subfolder of the data folder,
//! named after the backend, so indexes built with different backends never
//! touch each other. There `state.redb` holds the passages, the ledger and
//! the settings; the backend keeps its own files next to it.
//! [`RetrievalIndex::persist`] writes the backend first and `state.redb`
//! last, each through a write-then-rename, so the set on disk is always one
//! the index can load. Anything the two sides disagree on after a crash is
//! repaired when the index is opened.

use std::{
    collections::{BTreeSet, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use kdam::{BarExt, tqdm};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    backend::{IndexBackend, PassageDraft},
    chunking::{DocumentFormat, chunk_bytes},
    config::IndexConfig,
    embed::TokenCounter,
    error::{Error, Result},
    ledger::{FileLedger, FileRecord},
    passage::{Passage, SourceLocator},
    persist::remove_if_exists,
    state_db::StateDb,
    store::PassageStore,
    text_util::headline_for,
    walker::{DiscoveredFile, discover_files},
};

pub const STATE_FILE: &str = "state.redb";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Show progress bars on stderr.
    pub verbose: bool,
    /// Checked between files. Once set, the work done so far is persisted
    /// and the sync returns early.
    pub cancel: Arc<AtomicBool>,
}

/// A file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// What a sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub removed_files: usize,
    pub added_files: usize,
    pub removed_passages: usize,
    pub added_passages: usize,
    /// Files recorded without passages because they could not be read as
    /// text. They are retried once their modification time advances.
    pub skipped: Vec<SkippedFile>,
    /// Passages kept whole although they exceed the token budget.
    pub oversized: usize,
    pub cancelled: bool,
}

impl SyncReport {
    /// Whether the sync changed anything.
    pub fn is_noop(&self) -> bool {
        self.removed_files == 0
            && self.added_files == 0
            && self.skipped.is_empty()
    }
}

/// A passage returned by a query, with the backend's score when the backend
/// was consulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieved {
    pub passage: Passage,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub backend: &'static str,
    pub passages: usize,
    pub files: usize,
    pub backend_ids: usize,
    pub folder: PathBuf,
    pub docs_root: PathBuf,
}

pub struct RetrievalIndex<B, C> {
    config: IndexConfig,
    docs_root: PathBuf,
    folder: PathBuf,
    backend: B,
    counter: C,
    store: PassageStore,
    ledger: FileLedger,
    /// Whether memory holds changes the folder does not.
    dirty: bool,
}

impl<B: IndexBackend, C: TokenCounter> RetrievalIndex<B, C> {
    /// Load the index `backend` persisted under `data_dir`, or start a
    /// fresh one when its subfolder does not hold a complete state.
    ///
    /// Only `data_dir/<backend name>` is read or written; indexes of other
    /// backends in the same data folder are left alone.
    ///
    /// Nothing is read from `docs_root` until [`RetrievalIndex::sync`].
    pub fn open(
        config: IndexConfig,
        docs_root: impl Into<PathBuf>,
        data_dir: impl AsRef<Path>,
        backend: B,
        counter: C,
    ) -> Result<Self> {
        config.validate()?;
        let folder = data_dir.as_ref().join(backend.name());
        std::fs::create_dir_all(&folder)
            .map_err(|_| Error::DataDir(folder.clone()))?;

        let mut index = Self {
            config,
            docs_root: docs_root.into(),
            folder,
            backend,
            counter,
            store: PassageStore::new(),
            ledger: FileLedger::new(),
            dirty: false,
        };

        if index.exists() {
            index.restore()?;
        } else {
            index.create()?;
        }
        Ok(index)
    }

    fn state_path(&self) -> PathBuf {
        self.folder.join(STATE_FILE)
    }

    /// Whether the folder holds every artifact of a persisted index built
    /// with the same backend.
    pub fn exists(&self) -> bool {
        let path = self.state_path();
        if !path.is_file() || !self.backend.exists(&self.folder) {
            return false;
        }
        match StateDb::open(&path).and_then(|db| db.backend()) {
            Ok(Some(name)) => name == self.backend.name(),
            Ok(None) => false,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable state file"
                );
                false
            }
        }
    }

    fn create(&mut self) -> Result<()> {
        info!(
            folder = %self.folder.display(),
            backend = self.backend.name(),
            "creating new index"
        );
        // The state file goes first so a crash below never pairs it with a
        // fresh backend.
        remove_if_exists(&self.state_path())?;
        self.backend.create(&self.folder)?;
        self.store = PassageStore::new();
        self.ledger = FileLedger::new();
        self.dirty = true;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        {
            let state = StateDb::open(&self.state_path())?;
            self.store = state.passages()?;
            self.ledger = state.ledger()?;
            if let Some(stored) = state.config()?
                && stored != self.config
            {
                info!(
                    "configuration differs from the one the index was built \
                     with; only files changed from now on will use it"
                );
            }
        }
        self.backend.restore(&self.folder)?;
        self.dirty = false;
        if self.reconcile()? {
            self.persist()?;
        }
        debug!(
            passages = self.store.len(),
            files = self.ledger.len(),
            "restored index"
        );
        Ok(())
    }

    /// Bring the store, the ledger and the backend back into agreement.
    ///
    /// A file whose passages are not all present on both sides is forgotten
    /// entirely so the next sync indexes it again. Passages no file owns are
    /// dropped from both sides. Returns whether anything was repaired.
    fn reconcile(&mut self) -> Result<bool> {
        let backend_ids: BTreeSet<u64> =
            self.backend.ids()?.into_iter().collect();

        let store = &self.store;
        let broken = self.ledger.drain_where(|_, record| {
            record
                .passage_ids
                .iter()
                .any(|id| !store.contains(*id) || !backend_ids.contains(id))
        });
        for (path, _) in &broken {
            warn!(path = %path, "passages missing; file will be re-indexed");
        }

        let owned: HashSet<u64> = self.ledger.passage_ids().collect();
        let unowned: Vec<u64> =
            self.store.ids().filter(|id| !owned.contains(id)).collect();
        for id in &unowned {
            self.store.remove(*id);
        }

        let orphans: Vec<u64> = backend_ids
            .iter()
            .copied()
            .filter(|id| !owned.contains(id))
            .collect();
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "removing orphaned backend entries");
            self.backend.remove_several(&orphans)?;
        }

        let repaired =
            !broken.is_empty() || !unowned.is_empty() || !orphans.is_empty();
        if repaired {
            warn!(
                files = broken.len(),
                passages = unowned.len(),
                orphans = orphans.len(),
                "repaired index after restore"
            );
        }
        Ok(repaired)
    }

    /// Synchronize with the documentation folder. See
    /// [`RetrievalIndex::sync_with`].
    pub fn sync(&mut self, verbose: bool) -> Result<SyncReport> {
        self.sync_with(&SyncOptions {
            verbose,
            ..SyncOptions::default()
        })
    }

    /// Bring the index up to date with the documentation folder and persist
    /// it.
    ///
    /// Files that disappeared or were modified since they were indexed are
    /// purged first; then new and modified files are chunked and indexed.
    /// Fails before touching anything when the folder is missing, unreadable
    /// or holds no eligible file.
    pub fn sync_with(&mut self, options: &SyncOptions) -> Result<SyncReport> {
        let discovered = discover_files(&self.docs_root, &self.config)?;
        if discovered.is_empty() {
            return Err(Error::Config(format!(
                "no files to index in {}",
                self.docs_root.display()
            )));
        }

        let plan = self.ledger.plan(&discovered);
        let mut report = SyncReport::default();
        let cancelled = || options.cancel.load(Ordering::Relaxed);

        if !plan.remove.is_empty() {
            let mut bar = options.verbose.then(|| {
                tqdm!(total = plan.remove.len(), desc = "Removing old files")
            });
            for path in &plan.remove {
                if cancelled() {
                    report.cancelled = true;
                    break;
                }
                self.remove_file(path, &mut report)?;
                if let Some(bar) = &mut bar {
                    bar.update(1)?;
                }
            }
        }

        if !plan.add.is_empty() && !report.cancelled {
            // Reading is the only part that runs in parallel; chunking and
            // indexing stay sequential.
            let loaded: Vec<_> = plan
                .add
                .par_iter()
                .map(|file| (file, std::fs::read(&file.absolute_path)))
                .collect();

            let mut bar = options.verbose.then(|| {
                tqdm!(total = loaded.len(), desc = "Loading new files")
            });
            for (file, raw) in loaded {
                if cancelled() {
                    report.cancelled = true;
                    break;
                }
                self.add_file(file, raw, &mut report)?;
                if let Some(bar) = &mut bar {
                    bar.update(1)?;
                }
            }
        }

        if !report.is_noop() {
            self.dirty = true;
        }
        if self.dirty {
            self.persist()?;
        }

        info!(
            removed_files = report.removed_files,
            added_files = report.added_files,
            added_passages = report.added_passages,
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            "sync finished"
        );
        Ok(report)
    }

    fn remove_file(
        &mut self,
        path: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(record) = self.ledger.get(path) else {
            return Ok(());
        };
        // Verify before mutating anything: a ledger claiming passages the
        // store lacks means the two have diverged.
        if let Some(missing) =
            record.passage_ids.iter().find(|id| !self.store.contains(**id))
        {
            return Err(Error::Desync(format!(
                "{path} owns passage {missing}, which is not stored"
            )));
        }

        self.backend.remove_several(&record.passage_ids)?;
        for &id in &record.passage_ids {
            self.store.remove(id);
        }
        report.removed_passages += record.passage_ids.len();
        report.removed_files += 1;
        debug!(path, passages = record.passage_ids.len(), "removed file");
        self.ledger.remove(path);
        Ok(())
    }

    fn add_file(
        &mut self,
        file: &DiscoveredFile,
        raw: std::io::Result<Vec<u8>>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let path = file.relative_path.as_str();
        let format = DocumentFormat::from_path(Path::new(path));
        let chunked = raw
            .map_err(|e| Error::Content {
                path: path.to_string(),
                reason: e.to_string(),
            })
            .and_then(|raw| {
                chunk_bytes(
                    path,
                    &raw,
                    format,
                    &self.counter,
                    self.config.max_tokens_per_chunk,
                )
            });

        let chunks = match chunked {
            Ok(chunks) => chunks,
            Err(Error::Content { path, reason }) => {
                warn!(path = %path, reason = %reason, "skipping file");
                self.ledger.insert(
                    path.clone(),
                    FileRecord {
                        last_modified: file.mtime,
                        passage_ids: Vec::new(),
                    },
                );
                report.skipped.push(SkippedFile { path, reason });
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let headlines: Vec<String> = chunks
            .iter()
            .map(|chunk| headline_for(&chunk.content, chunk.heading.as_deref()))
            .collect();
        let drafts: Vec<PassageDraft<'_>> = chunks
            .iter()
            .zip(&headlines)
            .map(|(chunk, headline)| PassageDraft {
                content: &chunk.content,
                headline,
            })
            .collect();

        let ids = self.backend.add_several(&drafts)?;
        if ids.len() != chunks.len() {
            return Err(Error::Desync(format!(
                "backend returned {} ids for {} passages of {path}",
                ids.len(),
                chunks.len()
            )));
        }

        for (&id, chunk) in ids.iter().zip(chunks) {
            if chunk.oversized {
                warn!(path, id, "passage exceeds the token budget");
                report.oversized += 1;
            }
            let source = SourceLocator::new(path, chunk.anchor);
            self.store.insert(Passage::new(id, source, &chunk.content))?;
        }

        debug!(path, passages = ids.len(), "indexed file");
        report.added_passages += ids.len();
        report.added_files += 1;
        self.ledger.insert(
            path.to_string(),
            FileRecord {
                last_modified: file.mtime,
                passage_ids: ids,
            },
        );
        Ok(())
    }

    /// The `k` passages most relevant to `text`, best first, with scores.
    ///
    /// When the index holds `k` passages or fewer, all of them are returned
    /// in id order without consulting the backend, and carry no score.
    pub fn get_closest(&self, text: &str, k: usize) -> Result<Vec<Retrieved>> {
        if self.store.len() <= k {
            return Ok(self
                .store
                .iter()
                .map(|passage| Retrieved {
                    passage: passage.clone(),
                    score: None,
                })
                .collect());
        }

        self.backend
            .search(text, k)?
            .into_iter()
            .map(|hit| {
                let passage = self.store.get(hit.id).ok_or_else(|| {
                    Error::Desync(format!(
                        "backend returned passage {} which is not stored",
                        hit.id
                    ))
                })?;
                Ok(Retrieved {
                    passage: passage.clone(),
                    score: Some(hit.score),
                })
            })
            .collect()
    }

    /// The `k` passages most relevant to `text`, best first.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>> {
        Ok(self
            .get_closest(text, k)?
            .into_iter()
            .map(|retrieved| retrieved.passage)
            .collect())
    }

    /// Write the backend state, then the passages and the ledger.
    pub fn persist(&mut self) -> Result<()> {
        self.backend.persist(&self.folder)?;
        StateDb::write(
            &self.state_path(),
            &self.store,
            &self.ledger,
            self.backend.name(),
            &self.config,
        )?;
        self.dirty = false;
        debug!(folder = %self.folder.display(), "persisted index");
        Ok(())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            backend: self.backend.name(),
            passages: self.store.len(),
            files: self.ledger.len(),
            backend_ids: self.backend.ids()?.len(),
            folder: self.folder.clone(),
            docs_root: self.docs_root.clone(),
        })
    }

    pub fn passage(&self, id: u64) -> Option<&Passage> {
        self.store.get(id)
    }

    pub fn store(&self) -> &PassageStore {
        &self.store
    }

    pub fn ledger(&self) -> &FileLedger {
        &self.ledger
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The backend's own subfolder of the data folder.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn docs_root(&self) -> &Path {
        &self.docs_root
    }
}

impl<B, C> std::fmt::Debug for RetrievalIndex<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalIndex")
            .field("folder", &self.folder)
            .field("docs_root", &self.docs_root)
            .field("passages", &self.store.len())
            .field("files", &self.ledger.len())
            .finish_non_exhaustive()
    }
}
