use std::{
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use globset::GlobSet;

use crate::{
    config::IndexConfig,
    error::{Error, Result},
};

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the documentation folder, `/`-separated.
    pub relative_path: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time in nanoseconds since the Unix epoch.
    pub mtime: u64,
}

/// Recursively walk `root` and list the files eligible for indexing.
///
/// Skips hidden files and directories (names starting with `.`), files whose
/// extension is not configured and files matching an ignore glob. Results
/// are sorted by relative path.
///
/// A missing or unreadable `root` is a configuration error.
pub fn discover_files(
    root: &Path,
    config: &IndexConfig,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize().map_err(|e| {
        Error::Config(format!(
            "documentation folder {} is not readable: {e}",
            root.display()
        ))
    })?;
    if !canonical_root.is_dir() {
        return Err(Error::Config(format!(
            "documentation folder {} is not a directory",
            root.display()
        )));
    }

    let filter = Filter {
        config,
        ignore: config.ignore_set()?,
    };
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &filter, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

struct Filter<'a> {
    config: &'a IndexConfig,
    ignore: GlobSet,
}

impl Filter<'_> {
    fn accepts(&self, relative_path: &str, resolved: &Path) -> bool {
        self.config.accepts_extension(resolved)
            && !self.ignore.is_match(relative_path)
    }
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: &Filter<'_>,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, filter, results)?;
        } else if file_type.is_symlink() {
            // Broken links are skipped.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Linked directories are not followed, which rules out cycles.
            if !resolved.is_file() {
                continue;
            }
            push_if_accepted(root, &path, &resolved, filter, results)?;
        } else if file_type.is_file() {
            let resolved = path.canonicalize()?;
            push_if_accepted(root, &path, &resolved, filter, results)?;
        }
    }

    Ok(())
}

fn push_if_accepted(
    root: &Path,
    path: &Path,
    resolved: &Path,
    filter: &Filter<'_>,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let relative_path = relative_string(root, path);
    if !filter.accepts(&relative_path, resolved) {
        return Ok(());
    }

    results.push(DiscoveredFile {
        relative_path,
        absolute_path: resolved.to_path_buf(),
        mtime: modified_nanos(resolved)?,
    });
    Ok(())
}

fn relative_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Modification time of `path` in nanoseconds since the Unix epoch.
pub fn modified_nanos(path: &Path) -> Result<u64> {
    let nanos = std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    Ok(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[test]
    fn discovers_configured_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("guide.rst"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files =
            discover_files(tmp.path(), &IndexConfig::default()).unwrap();
        assert_eq!(names(&files), vec!["guide.rst", "note.md", "readme.txt"]);
    }

    #[test]
    fn extensions_can_be_narrowed() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();

        let config = IndexConfig {
            extensions: vec!["md".into()],
            ..IndexConfig::default()
        };
        let files = discover_files(tmp.path(), &config).unwrap();
        assert_eq!(names(&files), vec!["note.md"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "notes").unwrap();

        let files =
            discover_files(tmp.path(), &IndexConfig::default()).unwrap();
        assert_eq!(names(&files), vec!["notes.md"]);
    }

    #[test]
    fn recurses_with_forward_slashes() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("guide").join("jobs");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let files =
            discover_files(tmp.path(), &IndexConfig::default()).unwrap();
        assert_eq!(names(&files), vec!["guide/jobs/deep.md", "top.md"]);
    }

    #[test]
    fn ignore_globs_apply_to_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let drafts = tmp.path().join("drafts");
        std::fs::create_dir(&drafts).unwrap();
        std::fs::write(drafts.join("wip.md"), "wip").unwrap();
        std::fs::write(tmp.path().join("done.md"), "done").unwrap();

        let config = IndexConfig {
            ignore: vec!["drafts/**".into()],
            ..IndexConfig::default()
        };
        let files = discover_files(tmp.path(), &config).unwrap();
        assert_eq!(names(&files), vec!["done.md"]);
    }

    #[test]
    fn mtime_is_nonzero() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.md"), "content").unwrap();

        let files =
            discover_files(tmp.path(), &IndexConfig::default()).unwrap();
        assert!(files[0].mtime > 0);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let files =
            discover_files(tmp.path(), &IndexConfig::default()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_files(
            &tmp.path().join("does-not-exist"),
            &IndexConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn file_root_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.md");
        std::fs::write(&file, "x").unwrap();
        let err = discover_files(&file, &IndexConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
