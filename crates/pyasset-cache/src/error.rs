use std::path::PathBuf;

use crate::bytecode::CompileError;

/// Errors produced by the bytecode and extraction caches.
///
/// Bytecode artifact *write* failures never appear here; they are logged and dropped inside
/// [`crate::BytecodeCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] pyasset_archive::ArchiveError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("failed to extract {path}: {source}")]
    ExtractionWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad magic number in {path}: expected {expected:02x?}, found {found:02x?}")]
    BadMagic {
        path: String,
        expected: [u8; 4],
        found: Vec<u8>,
    },

    #[error("path has no parent: {path}")]
    NoParent { path: PathBuf },
}

impl CacheError {
    /// The underlying I/O error kind, when there is one.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            CacheError::Io(err) | CacheError::ExtractionWriteFailed { source: err, .. } => {
                Some(err.kind())
            }
            _ => None,
        }
    }
}
