//! Configuration of a retrieval index.
//!
//! An [`IndexConfig`] is built by the caller and passed to
//! [`RetrievalIndex::open`](crate::index::RetrievalIndex::open). It is
//! recorded next to the persisted state so a reopened index can tell whether
//! it was built with compatible settings.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_DIMENSION: usize = 384;
pub const DEFAULT_HEADLINE_BOOST: f32 = 5.0;
pub const DEFAULT_MAX_TOKENS_PER_CHUNK: usize = 1024;
pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst"];

/// How the dense backend compares vectors.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Raw dot product. Equivalent to cosine for normalized embeddings.
    #[default]
    InnerProduct,
    /// Dot product of L2-normalized vectors.
    Cosine,
}

impl Similarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Similarity::InnerProduct => "inner_product",
            Similarity::Cosine => "cosine",
        }
    }
}

impl std::fmt::Display for Similarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Embedding length expected by the dense backend.
    pub dimension: usize,
    pub similarity: Similarity,
    /// Weight of the headline field relative to the content field in the
    /// sparse backend.
    pub headline_boost: f32,
    /// Token budget of a single passage.
    pub max_tokens_per_chunk: usize,
    /// File extensions (without the dot) eligible for indexing.
    pub extensions: Vec<String>,
    /// Glob patterns matched against paths relative to the documentation
    /// folder. Matching files are not indexed.
    pub ignore: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            similarity: Similarity::default(),
            headline_boost: DEFAULT_HEADLINE_BOOST,
            max_tokens_per_chunk: DEFAULT_MAX_TOKENS_PER_CHUNK,
            extensions: DEFAULT_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            ignore: Vec::new(),
        }
    }
}

impl IndexConfig {
    /// Passage budget that lets `min_passages_per_query` passages share a
    /// model context of `context_size` tokens with the question and the
    /// answer.
    ///
    /// # Examples
    ///
    /// ```
    /// use docindex::config::IndexConfig;
    ///
    /// assert_eq!(IndexConfig::max_tokens_for_context(8192, 6), 1024);
    /// ```
    pub fn max_tokens_for_context(
        context_size: usize,
        min_passages_per_query: usize,
    ) -> usize {
        context_size / (min_passages_per_query + 2)
    }

    /// Set [`IndexConfig::max_tokens_per_chunk`] from a context size.
    pub fn with_context_budget(
        mut self,
        context_size: usize,
        min_passages_per_query: usize,
    ) -> Self {
        self.max_tokens_per_chunk =
            Self::max_tokens_for_context(context_size, min_passages_per_query);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be positive".into()));
        }
        if self.max_tokens_per_chunk == 0 {
            return Err(Error::Config(
                "max_tokens_per_chunk must be positive".into(),
            ));
        }
        if !(self.headline_boost.is_finite() && self.headline_boost > 0.0) {
            return Err(Error::Config(format!(
                "headline_boost must be a positive number, got {}",
                self.headline_boost
            )));
        }
        if self.extensions.is_empty() {
            return Err(Error::Config(
                "at least one file extension is required".into(),
            ));
        }
        self.ignore_set().map(|_| ())
    }

    pub fn ignore_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::Config(format!("invalid ignore pattern {pattern:?}: {e}"))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| Error::Config(format!("invalid ignore patterns: {e}")))
    }

    /// Whether `path` has one of the configured extensions. Case-insensitive.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = IndexConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dimension, 384);
        assert_eq!(config.similarity, Similarity::InnerProduct);
        assert_eq!(config.headline_boost, 5.0);
    }

    #[test]
    fn context_budget() {
        assert_eq!(IndexConfig::max_tokens_for_context(4096, 2), 1024);
        let config = IndexConfig::default().with_context_budget(1000, 3);
        assert_eq!(config.max_tokens_per_chunk, 200);
    }

    #[test]
    fn rejects_bad_values() {
        let zero_dim = IndexConfig {
            dimension: 0,
            ..IndexConfig::default()
        };
        assert!(matches!(zero_dim.validate(), Err(Error::Config(_))));

        let nan_boost = IndexConfig {
            headline_boost: f32::NAN,
            ..IndexConfig::default()
        };
        assert!(matches!(nan_boost.validate(), Err(Error::Config(_))));

        let bad_glob = IndexConfig {
            ignore: vec!["a/[".into()],
            ..IndexConfig::default()
        };
        assert!(matches!(bad_glob.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn extension_matching_ignores_case() {
        let config = IndexConfig::default();
        assert!(config.accepts_extension(Path::new("docs/A.MD")));
        assert!(config.accepts_extension(Path::new("notes.rst")));
        assert!(!config.accepts_extension(Path::new("image.png")));
        assert!(!config.accepts_extension(Path::new("Makefile")));
    }

    #[test]
    fn ignore_globs_match_relative_paths() {
        let config = IndexConfig {
            ignore: vec!["drafts/**".into(), "*.txt".into()],
            ..IndexConfig::default()
        };
        let set = config.ignore_set().unwrap();
        assert!(set.is_match("drafts/wip.md"));
        assert!(set.is_match("notes.txt"));
        assert!(!set.is_match("guide/intro.md"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: IndexConfig =
            serde_json::from_str(r#"{"similarity":"cosine"}"#).unwrap();
        assert_eq!(config.similarity, Similarity::Cosine);
        assert_eq!(config.max_tokens_per_chunk, 1024);
    }
}
