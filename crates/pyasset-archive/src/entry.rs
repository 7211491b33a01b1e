/// One named object in an archive's directory table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub(crate) path: String,
    pub(crate) is_directory: bool,
    pub(crate) size: u64,
    pub(crate) compressed_size: u64,
    pub(crate) mtime: i64,
    pub(crate) content_offset: u64,
    // `None` for directories implied by deeper entries.
    pub(crate) zip_index: Option<usize>,
}

impl ArchiveEntry {
    pub(crate) fn synthesized_dir(path: String, mtime: i64) -> Self {
        Self {
            path,
            is_directory: true,
            size: 0,
            compressed_size: 0,
            mtime,
            content_offset: 0,
            zip_index: None,
        }
    }

    /// Archive-relative, `/`-separated path without a trailing slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Modification time in whole seconds since the Unix epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn content_offset(&self) -> u64 {
        self.content_offset
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path of the containing directory (`""` for top-level entries).
    pub fn parent(&self) -> &str {
        self.path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}
