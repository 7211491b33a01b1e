use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CacheError;

/// Upper bound on an artifact we are willing to read back into memory.
///
/// A corrupted or hostile cache file should degrade to a cache miss, not an allocation
/// failure.
pub(crate) const MAX_ARTIFACT_BYTES: u64 = 256 * 1024 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replace `path` with `bytes`, or leave it untouched.
///
/// The payload goes to a uniquely named sibling first and is renamed over the destination
/// only after a complete, synced write. On any failure the temporary file is removed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => {
            return Err(CacheError::NoParent {
                path: path.to_path_buf(),
            })
        }
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written {
        remove_tmp_best_effort(&tmp_path);
        return Err(err.into());
    }

    if let Err(err) = rename_over(&tmp_path, path) {
        remove_tmp_best_effort(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn rename_over(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // `rename` does not replace an existing file on Windows.
        Err(err) if cfg!(windows) && to.exists() => {
            fs::remove_file(to).or_else(|remove_err| {
                if remove_err.kind() == io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(err)
                }
            })?;
            fs::rename(from, to)
        }
        Err(err) => Err(err),
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn remove_tmp_best_effort(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target: "pyasset.cache",
                path = %path.display(),
                error = %err,
                "failed to remove temporary file"
            );
        }
    }
}

/// Read a cache artifact, treating anything unexpected as a miss.
pub(crate) fn read_artifact(path: &Path) -> Option<Vec<u8>> {
    // Avoid following symlinks out of the cache directory.
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "pyasset.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to stat cache artifact"
                );
            }
            return None;
        }
    };
    if meta.file_type().is_symlink() || !meta.is_file() || meta.len() > MAX_ARTIFACT_BYTES {
        return None;
    }

    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::debug!(
                target: "pyasset.cache",
                path = %path.display(),
                error = %err,
                "failed to read cache artifact"
            );
            None
        }
    }
}
