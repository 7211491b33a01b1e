use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use pyasset_archive::{ArchiveEntry, ArchiveIndex};

use crate::error::CacheError;
use crate::lock::PathLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// The destination already carried the entry's mtime and was left alone.
    Unchanged(PathBuf),
    /// The entry was (re)written to the destination.
    Extracted(PathBuf),
}

impl ExtractOutcome {
    pub fn path(&self) -> &Path {
        match self {
            ExtractOutcome::Unchanged(path) | ExtractOutcome::Extracted(path) => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            ExtractOutcome::Unchanged(path) | ExtractOutcome::Extracted(path) => path,
        }
    }

    pub fn was_extracted(&self) -> bool {
        matches!(self, ExtractOutcome::Extracted(_))
    }
}

/// Materializes archive entries under a writable root, one subtree per bundle mount.
///
/// A destination is up to date iff its mtime equals the entry's recorded mtime; extracted
/// files get that mtime stamped on them after writing. Files are rewritten in place, so a
/// destination the process cannot write fails loudly instead of being silently replaced.
#[derive(Clone, Debug)]
pub struct ExtractionCache {
    root: PathBuf,
}

impl ExtractionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<mount>/<entry_path>`.
    pub fn destination(&self, mount: &str, entry_path: &str) -> PathBuf {
        let mut dest = self.root.join(mount);
        for component in entry_path.split('/').filter(|c| !c.is_empty()) {
            dest.push(component);
        }
        dest
    }

    pub fn ensure_extracted(
        &self,
        archive: &ArchiveIndex,
        entry: &ArchiveEntry,
        dest: &Path,
    ) -> Result<ExtractOutcome, CacheError> {
        let _lock = PathLock::acquire(dest);

        if entry.is_directory() {
            if dest.is_dir() {
                return Ok(ExtractOutcome::Unchanged(dest.to_path_buf()));
            }
            fs::create_dir_all(dest).map_err(|source| CacheError::ExtractionWriteFailed {
                path: dest.to_path_buf(),
                source,
            })?;
            return Ok(ExtractOutcome::Extracted(dest.to_path_buf()));
        }

        let target_mtime = FileTime::from_unix_time(entry.mtime(), 0);
        if let Ok(meta) = fs::metadata(dest) {
            if meta.is_file() && FileTime::from_last_modification_time(&meta) == target_mtime {
                tracing::trace!(
                    target: "pyasset.cache",
                    path = %dest.display(),
                    "extracted file is up to date"
                );
                return Ok(ExtractOutcome::Unchanged(dest.to_path_buf()));
            }
        }

        let contents = archive.read(entry)?;
        write_extracted(dest, &contents, target_mtime)?;

        tracing::debug!(
            target: "pyasset.cache",
            archive = %archive.path().display(),
            entry = entry.path(),
            path = %dest.display(),
            bytes = contents.len(),
            "extracted archive entry"
        );
        Ok(ExtractOutcome::Extracted(dest.to_path_buf()))
    }
}

fn write_extracted(dest: &Path, contents: &[u8], mtime: FileTime) -> Result<(), CacheError> {
    let failed = |source| CacheError::ExtractionWriteFailed {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    let mut file = File::create(dest).map_err(failed)?;
    file.write_all(contents).map_err(failed)?;
    drop(file);
    filetime::set_file_mtime(dest, mtime).map_err(failed)
}
