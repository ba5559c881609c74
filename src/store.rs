//! The passage store: every live passage, keyed by id.

use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    passage::Passage,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassageStore {
    passages: BTreeMap<u64, Passage>,
}

impl PassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.passages.contains_key(&id)
    }

    pub fn get(&self, id: u64) -> Option<&Passage> {
        self.passages.get(&id)
    }

    /// Look up a passage that must exist.
    pub fn require(&self, id: u64) -> Result<&Passage> {
        self.get(id).ok_or_else(|| Error::NotFound {
            kind: "passage",
            name: id.to_string(),
        })
    }

    /// Store a passage under its own id.
    ///
    /// Ids are never reused while a passage holds them: inserting over a
    /// live id is a desynchronization between the store and the backend
    /// that produced the id.
    pub fn insert(&mut self, passage: Passage) -> Result<()> {
        if self.passages.contains_key(&passage.id) {
            return Err(Error::Desync(format!(
                "passage id {} is already in use",
                passage.id
            )));
        }
        self.passages.insert(passage.id, passage);
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<Passage> {
        self.passages.remove(&id)
    }

    /// Passages in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Passage> {
        self.passages.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.passages.keys().copied()
    }
}

impl FromIterator<Passage> for PassageStore {
    fn from_iter<I: IntoIterator<Item = Passage>>(iter: I) -> Self {
        Self {
            passages: iter.into_iter().map(|p| (p.id, p)).collect(),
        }
    }
}
