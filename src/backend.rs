//! The capability every search structure offers to the retrieval index.

use std::path::Path;

use crate::error::Result;

/// A search hit: a passage id and how well it matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: u64,
    pub score: f32,
}

/// What a backend needs to index one passage.
#[derive(Debug, Clone, Copy)]
pub struct PassageDraft<'a> {
    pub content: &'a str,
    /// Title-like text weighted above the content by lexical backends.
    pub headline: &'a str,
}

/// A searchable structure over passage ids.
///
/// The backend owns id assignment: [`IndexBackend::add_several`] returns the
/// ids it chose, in input order, and the caller stores passages under them.
/// All of a backend's files live under the folder passed to
/// [`IndexBackend::create`], [`IndexBackend::restore`] and
/// [`IndexBackend::persist`].
pub trait IndexBackend {
    /// Stable name recorded next to the persisted state.
    fn name(&self) -> &'static str;

    /// Index `drafts` and return one fresh id per draft.
    ///
    /// Either every draft is indexed or none is.
    fn add_several(&mut self, drafts: &[PassageDraft<'_>]) -> Result<Vec<u64>>;

    /// Forget `ids`. Unknown ids are ignored.
    fn remove_several(&mut self, ids: &[u64]) -> Result<()>;

    /// At most `k` hits, best first. Equal scores are ordered by id.
    fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredId>>;

    /// Every id currently indexed, ascending.
    fn ids(&self) -> Result<Vec<u64>>;

    /// Whether `folder` holds a complete persisted state for this backend.
    fn exists(&self, folder: &Path) -> bool;

    /// Start from an empty state bound to `folder`, discarding whatever
    /// this backend previously persisted there.
    fn create(&mut self, folder: &Path) -> Result<()>;

    /// Load the state persisted in `folder`.
    fn restore(&mut self, folder: &Path) -> Result<()>;

    /// Make the current state durable in `folder`.
    fn persist(&mut self, folder: &Path) -> Result<()>;
}

/// Order hits best first, breaking ties by lower id, and keep `k`.
pub(crate) fn rank(mut hits: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    hits.truncate(k);
    hits
}
