//! Utilities shared by pyasset tests.
//!
//! The main entry point is [`BundleBuilder`], which writes small zip bundles with
//! controlled entry timestamps so that cache and extraction tests can reason about exact
//! mtimes.

pub mod env;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub use env::{env_lock, EnvVarGuard};

/// Timestamp stamped on fixture entries unless overridden: 2020-02-28 19:26:06 UTC.
///
/// Zip timestamps have two-second resolution, so fixture seconds are always even.
pub const FIXTURE_MTIME: (u16, u8, u8, u8, u8, u8) = (2020, 2, 28, 19, 26, 6);

/// [`FIXTURE_MTIME`] as seconds since the Unix epoch.
pub const FIXTURE_MTIME_SECS: i64 = 1_582_917_966;

enum FixtureEntry {
    File {
        path: String,
        contents: Vec<u8>,
        mtime: (u16, u8, u8, u8, u8, u8),
        deflate: bool,
    },
    Dir {
        path: String,
    },
}

#[derive(Default)]
pub struct BundleBuilder {
    entries: Vec<FixtureEntry>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        self.file_at(path, contents, FIXTURE_MTIME)
    }

    pub fn file_at(
        mut self,
        path: &str,
        contents: impl AsRef<[u8]>,
        mtime: (u16, u8, u8, u8, u8, u8),
    ) -> Self {
        self.entries.push(FixtureEntry::File {
            path: path.to_owned(),
            contents: contents.as_ref().to_vec(),
            mtime,
            deflate: true,
        });
        self
    }

    /// Add a file entry stored without compression.
    pub fn stored(mut self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        self.entries.push(FixtureEntry::File {
            path: path.to_owned(),
            contents: contents.as_ref().to_vec(),
            mtime: FIXTURE_MTIME,
            deflate: false,
        });
        self
    }

    /// Add an explicit directory record (most bundles only imply directories).
    pub fn dir(mut self, path: &str) -> Self {
        self.entries.push(FixtureEntry::Dir {
            path: path.to_owned(),
        });
        self
    }

    /// Write the bundle to `dest`, creating parent directories.
    pub fn write(&self, dest: &Path) -> PathBuf {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut zip = ZipWriter::new(File::create(dest).unwrap());
        for entry in &self.entries {
            match entry {
                FixtureEntry::File {
                    path,
                    contents,
                    mtime,
                    deflate,
                } => {
                    let (y, mo, d, h, mi, s) = *mtime;
                    let method = if *deflate {
                        CompressionMethod::Deflated
                    } else {
                        CompressionMethod::Stored
                    };
                    let options = SimpleFileOptions::default()
                        .compression_method(method)
                        .last_modified_time(DateTime::from_date_and_time(y, mo, d, h, mi, s).unwrap());
                    zip.start_file(path.as_str(), options).unwrap();
                    zip.write_all(contents).unwrap();
                }
                FixtureEntry::Dir { path } => {
                    zip.add_directory(path.as_str(), SimpleFileOptions::default())
                        .unwrap();
                }
            }
        }
        zip.finish().unwrap();
        dest.to_path_buf()
    }
}

/// Modification time of `path` as a [`FileTime`].
pub fn mtime_of(path: &Path) -> FileTime {
    let meta = std::fs::metadata(path).unwrap();
    FileTime::from_last_modification_time(&meta)
}

/// Move `path`'s mtime `secs` seconds into the past.
///
/// Filesystems with coarse timestamps make "was this rewritten?" checks flaky unless the
/// reference mtime is well away from the current time.
pub fn backdate(path: &Path, secs: u64) -> FileTime {
    let past = SystemTime::now()
        .checked_sub(Duration::from_secs(secs))
        .unwrap_or(UNIX_EPOCH);
    let time = FileTime::from_system_time(past);
    filetime::set_file_mtime(path, time).unwrap();
    time
}

/// Set `path`'s mtime to the current time, like `touch`.
pub fn touch(path: &Path) -> FileTime {
    let now = FileTime::now();
    filetime::set_file_mtime(path, now).unwrap();
    now
}

/// Set unix permission bits on `path`, returning the previous mode.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    let previous = std::fs::metadata(path).unwrap().permissions().mode();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    previous
}

/// Whether the current process bypasses file permission checks (e.g. running as root).
///
/// Tests asserting "permission denied" are meaningless in that case.
#[cfg(unix)]
pub fn permissions_enforced(scratch_dir: &Path) -> bool {
    let probe = scratch_dir.join(".permission-probe");
    std::fs::write(&probe, b"probe").unwrap();
    set_mode(&probe, 0o444);
    let writable = std::fs::OpenOptions::new().write(true).open(&probe).is_ok();
    set_mode(&probe, 0o644);
    let _ = std::fs::remove_file(&probe);
    if writable {
        tracing::debug!(
            target: "pyasset.test",
            "read-only files are writable by this process; skipping permission assertions"
        );
    }
    !writable
}
