use std::path::{Path, PathBuf};

use crate::{
    dense,
    error::{Error, Result},
    index::STATE_FILE,
    sparse,
};

/// Environment variable overriding the default index folder.
pub const DATA_DIR_ENV: &str = "DOCINDEX_DATA_DIR";

/// The folder holding the persisted indexes, one subfolder per backend.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCINDEX_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docindex/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docindex")
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

    /// Subfolder holding everything the named backend persists.
    pub fn index_dir(&self, backend: &str) -> PathBuf {
        self.root.join(backend)
    }

    pub fn state_db(&self, backend: &str) -> PathBuf {
        self.index_dir(backend).join(STATE_FILE)
    }

    pub fn dense_db(&self) -> PathBuf {
        self.index_dir(dense::BACKEND_NAME).join(dense::DENSE_FILE)
    }

    pub fn sparse_dir(&self) -> PathBuf {
        self.index_dir(sparse::BACKEND_NAME).join(sparse::SPARSE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(
            dir.state_db("dense"),
            tmp.path().join("dense").join("state.redb")
        );
        assert_eq!(
            dir.dense_db(),
            tmp.path().join("dense").join("dense.redb")
        );
        assert_eq!(
            dir.sparse_dir(),
            tmp.path().join("sparse").join("tantivy")
        );
    }

    #[test]
    fn missing_explicit_path_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
    }
}
