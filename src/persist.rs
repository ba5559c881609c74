//! All-or-nothing replacement of redb files.
//!
//! Every artifact is written to `<name>.tmp` in full, committed, closed and
//! only then renamed over `<name>`. A crash at any point leaves either the
//! previous file or the new one, never a mix.

use std::{
    fs,
    path::{Path, PathBuf},
};

use redb::{Database, WriteTransaction};

use crate::error::Result;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Build a fresh database at `path` with `fill`, then swap it into place.
pub fn replace_database(
    path: &Path,
    fill: impl FnOnce(&WriteTransaction) -> Result<()>,
) -> Result<()> {
    let tmp = tmp_path(path);
    // A leftover from an interrupted write would be reopened, not truncated.
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    let written = write_new(&tmp, fill);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        // Best effort: not every platform can fsync a directory.
        let _ = dir.sync_all();
    }
    Ok(())
}

fn write_new(
    path: &Path,
    fill: impl FnOnce(&WriteTransaction) -> Result<()>,
) -> Result<()> {
    let db = Database::create(path)?;
    let txn = db.begin_write()?;
    fill(&txn)?;
    txn.commit()?;
    Ok(())
}

/// Remove `path` if it exists.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
