//! docindex - an incremental passage retrieval index over a folder of
//! documentation.
//!
//! Files are cut into passages that fit a token budget, indexed by a dense
//! similarity backend or a [Tantivy](https://github.com/quickwit-oss/tantivy)
//! lexical backend, and kept in step with the folder: a sync only touches
//! files that appeared, changed or disappeared since the last one.
//!
//! # Quick start
//!
//! ```no_run
//! use docindex::{DataDir, IndexConfig, RetrievalIndex};
//! use docindex::embed::WhitespaceTokenCounter;
//! use docindex::sparse::SparseBackend;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config = IndexConfig::default();
//! let backend = SparseBackend::new(&config).unwrap();
//! let mut index = RetrievalIndex::open(
//!     config,
//!     "docs",
//!     data_dir.root(),
//!     backend,
//!     WhitespaceTokenCounter,
//! )
//! .unwrap();
//!
//! index.sync(false).unwrap();
//! for passage in index.query("how do I submit a job", 3).unwrap() {
//!     println!("{}: {}", passage.source, passage.content);
//! }
//! ```

pub mod backend;
pub mod chunking;
pub mod config;
pub mod data_dir;
pub mod dense;
pub mod embed;
pub mod error;
pub mod index;
pub mod ledger;
pub mod passage;
pub mod persist;
pub mod sparse;
pub mod state_db;
pub mod store;
pub mod text_util;
pub mod walker;

pub use config::{IndexConfig, Similarity};
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use index::{RetrievalIndex, SyncOptions, SyncReport};
pub use passage::{Passage, SourceLocator};
