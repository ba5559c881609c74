//! Sparse lexical backend on tantivy.
//!
//! Passages are indexed in two text fields, `headline` and `content`,
//! scored with BM25. Field norms are not recorded, so every passage is
//! treated as having the same length: short passages are not favoured over
//! long ones. Queries match any of their terms, with headline matches
//! boosted by [`IndexConfig::headline_boost`].
//!
//! Every mutating call commits before returning. The id counter travels in
//! the commit payload, so it is always consistent with the committed
//! documents.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    Searcher,
    TantivyDocument,
    Term,
    collector::{DocSetCollector, TopDocs},
    directory::MmapDirectory,
    doc,
    query::{AllQuery, Query, QueryParser},
    schema::*,
    tokenizer::{
        Language,
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};
use tracing::debug;

use crate::{
    backend::{IndexBackend, PassageDraft, ScoredId, rank},
    config::IndexConfig,
    error::{Error, Result},
};

/// Name recorded for this backend; also the folder holding its index.
pub const BACKEND_NAME: &str = "sparse";

pub const SPARSE_DIR: &str = "tantivy";

const WRITER_MEMORY: usize = 15_000_000;
const TOKENIZER: &str = "en_stem";

/// Field names used in the schema.
pub mod fields {
    pub const PASSAGE_ID: &str = "passage_id";
    pub const HEADLINE: &str = "headline";
    pub const CONTENT: &str = "content";
}

#[derive(Clone, Copy)]
struct SchemaFields {
    passage_id: Field,
    headline: Field,
    content: Field,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitPayload {
    next_id: u64,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_u64_field(fields::PASSAGE_ID, INDEXED | STORED | FAST);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions)
            .set_fieldnorms(false),
    );
    builder.add_text_field(fields::HEADLINE, text_opts.clone());
    builder.add_text_field(fields::CONTENT, text_opts);

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register(TOKENIZER, en_stem);
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    let field = |name: &str| {
        schema.get_field(name).map_err(|_| {
            Error::Desync(format!("sparse index has no {name} field"))
        })
    };
    Ok(SchemaFields {
        passage_id: field(fields::PASSAGE_ID)?,
        headline: field(fields::HEADLINE)?,
        content: field(fields::CONTENT)?,
    })
}

fn open_mmap(dir: &Path) -> Result<MmapDirectory> {
    MmapDirectory::open(dir).map_err(|e| {
        Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    })
}

pub struct SparseBackend {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    fields: SchemaFields,
    headline_boost: f32,
    next_id: u64,
    location: Option<PathBuf>,
}

impl SparseBackend {
    /// An empty in-memory backend. [`IndexBackend::create`] or
    /// [`IndexBackend::restore`] binds it to a folder.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        Self::from_index(
            Index::create_in_ram(build_schema()),
            config.headline_boost,
            None,
        )
    }

    fn from_index(
        index: Index,
        headline_boost: f32,
        location: Option<PathBuf>,
    ) -> Result<Self> {
        register_tokenizers(&index);
        let fields = resolve_fields(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer(WRITER_MEMORY)?;

        let mut backend = Self {
            index,
            reader,
            writer,
            fields,
            headline_boost,
            next_id: 0,
            location,
        };
        backend.next_id = backend.committed_next_id()?;
        Ok(backend)
    }

    /// Release the current index, and with it the writer's lock on its
    /// directory.
    fn detach(&mut self) -> Result<()> {
        *self = Self::from_index(
            Index::create_in_ram(build_schema()),
            self.headline_boost,
            None,
        )?;
        Ok(())
    }

    /// Id counter as of the last commit, never below the largest live id.
    fn committed_next_id(&self) -> Result<u64> {
        let from_payload = match self.index.load_metas()?.payload {
            Some(json) => serde_json::from_str::<CommitPayload>(&json)?.next_id,
            None => 0,
        };
        let from_ids = self.ids()?.last().map_or(0, |id| id + 1);
        Ok(from_payload.max(from_ids))
    }

    fn path(folder: &Path) -> PathBuf {
        folder.join(SPARSE_DIR)
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn commit(&mut self) -> Result<()> {
        let payload = serde_json::to_string(&CommitPayload {
            next_id: self.next_id,
        })?;
        let mut prepared = self.writer.prepare_commit()?;
        prepared.set_payload(&payload);
        prepared.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Index passages under ids chosen by the caller.
    ///
    /// A passage already stored under one of the ids is replaced. The id
    /// counter moves past every id seen.
    pub fn add_with_ids(
        &mut self,
        entries: &[(u64, PassageDraft<'_>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let f = self.fields;
        let previous_next_id = self.next_id;
        for (id, draft) in entries {
            self.writer
                .delete_term(Term::from_field_u64(f.passage_id, *id));
            let added = self.writer.add_document(doc!(
                f.passage_id => *id,
                f.headline => draft.headline,
                f.content => draft.content,
            ));
            if let Err(e) = added {
                self.writer.rollback()?;
                self.next_id = previous_next_id;
                return Err(e.into());
            }
            self.next_id = self.next_id.max(id + 1);
        }

        self.commit()
    }

    fn stored_id(
        &self,
        searcher: &Searcher,
        address: DocAddress,
    ) -> Result<u64> {
        let doc: TantivyDocument = searcher.doc(address)?;
        doc.get_first(self.fields.passage_id)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                Error::Desync("sparse document without a passage id".into())
            })
    }

    fn parse(&self, text: &str) -> Box<dyn Query> {
        let f = self.fields;
        let mut parser =
            QueryParser::for_index(&self.index, vec![f.headline, f.content]);
        parser.set_field_boost(f.headline, self.headline_boost);
        let (query, _errors) = parser.parse_query_lenient(text);
        query
    }
}

impl IndexBackend for SparseBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn add_several(&mut self, drafts: &[PassageDraft<'_>]) -> Result<Vec<u64>> {
        let ids: Vec<u64> = (self.next_id..).take(drafts.len()).collect();
        let entries: Vec<(u64, PassageDraft<'_>)> =
            ids.iter().copied().zip(drafts.iter().copied()).collect();
        self.add_with_ids(&entries)?;
        Ok(ids)
    }

    fn remove_several(&mut self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for &id in ids {
            self.writer
                .delete_term(Term::from_field_u64(self.fields.passage_id, id));
        }
        self.commit()
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredId>> {
        let searcher = self.reader.searcher();
        let total = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
        if k == 0 || total == 0 {
            return Ok(Vec::new());
        }

        let query = self.parse(query);

        // Grow the window until the k-th score is not tied with the last
        // fetched one, so equal scores can be ordered by id.
        let mut limit = k.min(total);
        let top_docs = loop {
            let top_docs =
                searcher.search(&query, &TopDocs::with_limit(limit))?;
            let may_continue = top_docs.len() == limit
                && limit < total
                && top_docs[limit - 1].0 == top_docs[k.min(limit) - 1].0;
            if !may_continue {
                break top_docs;
            }
            limit = limit.saturating_mul(2).min(total);
        };

        let hits = top_docs
            .into_iter()
            .map(|(score, address)| {
                Ok(ScoredId {
                    id: self.stored_id(&searcher, address)?,
                    score,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rank(hits, k))
    }

    fn ids(&self) -> Result<Vec<u64>> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;
        let mut ids = addresses
            .into_iter()
            .map(|address| self.stored_id(&searcher, address))
            .collect::<Result<Vec<_>>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    fn exists(&self, folder: &Path) -> bool {
        Self::path(folder).join("meta.json").is_file()
    }

    fn create(&mut self, folder: &Path) -> Result<()> {
        self.detach()?;

        let dir = Self::path(folder);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        let index = Index::create(
            open_mmap(&dir)?,
            build_schema(),
            tantivy::IndexSettings::default(),
        )?;
        *self = Self::from_index(index, self.headline_boost, Some(dir))?;
        self.commit()
    }

    fn restore(&mut self, folder: &Path) -> Result<()> {
        self.detach()?;

        let dir = Self::path(folder);
        let index = Index::open(open_mmap(&dir)?)?;
        *self = Self::from_index(index, self.headline_boost, Some(dir))?;
        debug!(
            passages = self.len(),
            next_id = self.next_id,
            "restored sparse backend"
        );
        Ok(())
    }

    fn persist(&mut self, folder: &Path) -> Result<()> {
        // Batches are committed as they happen; only check the binding.
        match &self.location {
            Some(dir) if *dir == Self::path(folder) => Ok(()),
            _ => Err(Error::Config(format!(
                "sparse backend is not bound to {}",
                folder.display()
            ))),
        }
    }
}

impl std::fmt::Debug for SparseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseBackend")
            .field("location", &self.location)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
