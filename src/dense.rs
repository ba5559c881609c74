//! Dense similarity backend: exact nearest-neighbour search over embeddings.
//!
//! Vectors live in memory and are scored with a single matrix product per
//! query. Persistence is explicit: [`IndexBackend::persist`] writes
//! `dense.redb` (vectors as little-endian `f32` bytes plus the id counter),
//! and nothing touches disk in between.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use candle_core::{Device, Tensor};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::{
    backend::{IndexBackend, PassageDraft, ScoredId, rank},
    config::{IndexConfig, Similarity},
    embed::Embedder,
    error::{Error, Result},
    persist::{remove_if_exists, replace_database},
};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Name recorded for this backend; also the folder holding its index.
pub const BACKEND_NAME: &str = "dense";

pub const DENSE_FILE: &str = "dense.redb";

pub struct DenseBackend<E> {
    embedder: E,
    dimension: usize,
    similarity: Similarity,
    vectors: BTreeMap<u64, Vec<f32>>,
    next_id: u64,
}

impl<E: Embedder> DenseBackend<E> {
    /// Fails with [`Error::DimensionMismatch`] when `embedder` does not
    /// produce vectors of the configured dimension.
    pub fn new(embedder: E, config: &IndexConfig) -> Result<Self> {
        if embedder.dimension() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                actual: embedder.dimension(),
            });
        }
        Ok(Self {
            embedder,
            dimension: config.dimension,
            similarity: config.similarity,
            vectors: BTreeMap::new(),
            next_id: 0,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The id the next [`DenseBackend::add`] will return.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn vector(&self, id: u64) -> Option<&[f32]> {
        self.vectors.get(&id).map(Vec::as_slice)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Store `embedding` under a fresh id.
    ///
    /// Ids increase monotonically and are never handed out twice, even after
    /// the vector holding one is removed.
    pub fn add(&mut self, embedding: &[f32]) -> Result<u64> {
        self.check_dimension(embedding)?;
        let id = self.next_id;
        self.vectors.insert(id, embedding.to_vec());
        self.next_id += 1;
        Ok(id)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.vectors.remove(&id).is_some()
    }

    /// The `k` stored vectors most similar to `query`, best first.
    pub fn search_embedding(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredId>> {
        self.check_dimension(query)?;
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let scores = self.scores(query)?;
        let hits = self
            .vectors
            .keys()
            .zip(scores)
            .map(|(&id, score)| ScoredId {
                id,
                score: if score.is_nan() {
                    f32::NEG_INFINITY
                } else {
                    score
                },
            })
            .collect();
        Ok(rank(hits, k))
    }

    /// One score per stored vector, in id order.
    fn scores(&self, query: &[f32]) -> Result<Vec<f32>> {
        let cosine = self.similarity == Similarity::Cosine;
        let mut flat = Vec::with_capacity(self.vectors.len() * self.dimension);
        for vector in self.vectors.values() {
            if cosine {
                flat.extend(l2_normalized(vector));
            } else {
                flat.extend_from_slice(vector);
            }
        }
        let query = if cosine {
            l2_normalized(query)
        } else {
            query.to_vec()
        };

        let device = Device::Cpu;
        let shape = (self.vectors.len(), self.dimension);
        let matrix = Tensor::from_vec(flat, shape, &device)?;
        let query = Tensor::from_vec(query, (self.dimension, 1), &device)?;
        Ok(matrix.matmul(&query)?.squeeze(1)?.to_vec1::<f32>()?)
    }

    fn path(folder: &Path) -> PathBuf {
        folder.join(DENSE_FILE)
    }

    fn read_setting(
        table: &impl ReadableTable<&'static str, &'static str>,
        key: &str,
    ) -> Result<String> {
        table
            .get(key)?
            .map(|v| v.value().to_string())
            .ok_or_else(|| Error::NotFound {
                kind: "dense setting",
                name: key.to_string(),
            })
    }
}

fn l2_normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::Desync(format!("dense setting {key} has invalid value {value:?}"))
    })
}

impl<E: Embedder> IndexBackend for DenseBackend<E> {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn add_several(&mut self, drafts: &[PassageDraft<'_>]) -> Result<Vec<u64>> {
        // Embed everything first so a failure leaves the backend untouched.
        let embeddings = drafts
            .iter()
            .map(|draft| {
                let embedding = self.embedder.embed(draft.content)?;
                self.check_dimension(&embedding)?;
                Ok(embedding)
            })
            .collect::<Result<Vec<_>>>()?;

        embeddings.iter().map(|e| self.add(e)).collect()
    }

    fn remove_several(&mut self, ids: &[u64]) -> Result<()> {
        for &id in ids {
            self.remove(id);
        }
        Ok(())
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredId>> {
        let embedding = self.embedder.embed(query)?;
        self.search_embedding(&embedding, k)
    }

    fn ids(&self) -> Result<Vec<u64>> {
        Ok(self.vectors.keys().copied().collect())
    }

    fn exists(&self, folder: &Path) -> bool {
        Self::path(folder).is_file()
    }

    fn create(&mut self, folder: &Path) -> Result<()> {
        self.vectors.clear();
        self.next_id = 0;
        remove_if_exists(&Self::path(folder))
    }

    fn restore(&mut self, folder: &Path) -> Result<()> {
        let db = Database::open(Self::path(folder))?;
        let txn = db.begin_read()?;

        let settings = txn.open_table(SETTINGS)?;
        let dimension: usize = parse_setting(
            "dimension",
            &Self::read_setting(&settings, "dimension")?,
        )?;
        if dimension != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }
        let mut next_id: u64 = parse_setting(
            "next_id",
            &Self::read_setting(&settings, "next_id")?,
        )?;
        let stored_similarity = Self::read_setting(&settings, "similarity")?;
        if stored_similarity != self.similarity.as_str() {
            warn!(
                stored = %stored_similarity,
                configured = %self.similarity,
                "similarity changed since the index was built; using configured"
            );
        }

        let table = txn.open_table(VECTORS)?;
        let byte_len = self.dimension * size_of::<f32>();
        let mut vectors = BTreeMap::new();
        for entry in table.iter()? {
            let (id, bytes) = entry?;
            let bytes = bytes.value();
            if bytes.len() != byte_len {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    actual: bytes.len() / size_of::<f32>(),
                });
            }
            // Stored bytes carry no alignment guarantee, so copy.
            let vector: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
            vectors.insert(id.value(), vector);
        }

        if let Some(&last) = vectors.keys().next_back() {
            next_id = next_id.max(last + 1);
        }
        self.vectors = vectors;
        self.next_id = next_id;
        debug!(
            vectors = self.vectors.len(),
            next_id = self.next_id,
            "restored dense backend"
        );
        Ok(())
    }

    fn persist(&mut self, folder: &Path) -> Result<()> {
        replace_database(&Self::path(folder), |txn| {
            {
                let mut table = txn.open_table(VECTORS)?;
                for (&id, vector) in &self.vectors {
                    let bytes: &[u8] = bytemuck::cast_slice(vector.as_slice());
                    let mut guard = table.insert_reserve(id, bytes.len())?;
                    guard.as_mut().copy_from_slice(bytes);
                }
            }
            {
                let mut table = txn.open_table(SETTINGS)?;
                let next_id = self.next_id.to_string();
                let dimension = self.dimension.to_string();
                table.insert("next_id", next_id.as_str())?;
                table.insert("dimension", dimension.as_str())?;
                table.insert("similarity", self.similarity.as_str())?;
            }
            Ok(())
        })
    }
}

impl<E> std::fmt::Debug for DenseBackend<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseBackend")
            .field("dimension", &self.dimension)
            .field("similarity", &self.similarity)
            .field("vectors", &self.vectors.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
