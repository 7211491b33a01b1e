use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::header::{split_artifact, CacheHeader, HEADER_LEN};
use crate::lock::PathLock;
use crate::util::{atomic_write, read_artifact};

/// The host interpreter's compiler, as far as the caches are concerned.
///
/// Code execution stays with the host: the core only moves serialized code around.
pub trait Compiler: Send + Sync {
    /// Bytecode version magic; artifacts with any other magic are unconditionally stale.
    fn magic(&self) -> [u8; 4];

    /// Compile `source` and return the serialized code object.
    fn compile(&self, source: &[u8], filename: &str) -> Result<Vec<u8>, CompileError>;
}

/// A syntax (or other compile-time) error reported by the host compiler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub filename: String,
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}, line {}: {}", self.filename, line, self.message),
            None => write!(f, "{}: {}", self.filename, self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Serialized code, ready to hand to the host for execution.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeObject(Vec<u8>);

impl CodeObject {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeObject").field("len", &self.0.len()).finish()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvalidationMode {
    /// Compare the source's `(mtime, size)`; never reads the source on a hit.
    #[default]
    Timestamp,
    /// Compare a hash of the source text; reads the source on every load.
    CheckedHash,
}

/// Metadata of the source entry an artifact is validated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceStamp {
    pub mtime: i64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// The on-disk artifact's header matched and its payload was used as is.
    Hit,
    /// The source was recompiled. `persisted` is false if the artifact could not be written.
    Regenerated { persisted: bool },
}

#[derive(Debug)]
pub struct FreshCode {
    pub code: CodeObject,
    pub status: CacheStatus,
}

/// `<dir>/__pycache__/<stem>.<tag>.pyc` for a source path `<dir>/<stem>.py`.
pub fn cache_path_for(source_path: &Path, cache_tag: &str) -> Option<PathBuf> {
    let stem = source_path.file_stem()?.to_str()?;
    let parent = source_path.parent()?;
    Some(
        parent
            .join("__pycache__")
            .join(format!("{stem}.{cache_tag}.pyc")),
    )
}

pub struct BytecodeCache {
    compiler: Arc<dyn Compiler>,
    mode: InvalidationMode,
}

impl fmt::Debug for BytecodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytecodeCache")
            .field("magic", &self.compiler.magic())
            .field("mode", &self.mode)
            .finish()
    }
}

impl BytecodeCache {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            mode: InvalidationMode::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: InvalidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    pub fn magic(&self) -> [u8; 4] {
        self.compiler.magic()
    }

    /// Return code for a source module, reusing the artifact at `cache_path` if its header
    /// matches `stamp`.
    ///
    /// A matching header is sufficient: the payload is trusted without recompiling. On a
    /// mismatch the source is recompiled and a new artifact is written atomically; a failed
    /// write is logged and otherwise ignored.
    pub fn ensure_fresh<F>(
        &self,
        stamp: SourceStamp,
        filename: &str,
        cache_path: &Path,
        read_source: F,
    ) -> Result<FreshCode, CacheError>
    where
        F: FnOnce() -> Result<Vec<u8>, CacheError>,
    {
        let _lock = PathLock::acquire(cache_path);
        let magic = self.compiler.magic();

        let (expected, source) = match self.mode {
            InvalidationMode::Timestamp => (
                CacheHeader::timestamp(magic, stamp.mtime, stamp.size),
                LazySource::Unread(read_source),
            ),
            InvalidationMode::CheckedHash => {
                let text = read_source()?;
                let header = CacheHeader::hash(magic, source_hash(&text));
                (header, LazySource::Read(text))
            }
        };

        if let Some(bytes) = read_artifact(cache_path) {
            if CacheHeader::parse(&bytes) == Some(expected) {
                tracing::trace!(
                    target: "pyasset.cache",
                    path = %cache_path.display(),
                    "bytecode cache hit"
                );
                return Ok(FreshCode {
                    code: CodeObject(bytes[HEADER_LEN..].to_vec()),
                    status: CacheStatus::Hit,
                });
            }
            tracing::debug!(
                target: "pyasset.cache",
                path = %cache_path.display(),
                "bytecode cache header mismatch"
            );
        }

        let source = source.into_bytes()?;
        let code = self.compiler.compile(&source, filename)?;

        let mut artifact = Vec::with_capacity(HEADER_LEN + code.len());
        artifact.extend_from_slice(&expected.to_bytes());
        artifact.extend_from_slice(&code);
        let persisted = match atomic_write(cache_path, &artifact) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(
                    target: "pyasset.cache",
                    path = %cache_path.display(),
                    error = %err,
                    "failed to write bytecode cache; continuing with in-memory code"
                );
                false
            }
        };

        Ok(FreshCode {
            code: CodeObject(code),
            status: CacheStatus::Regenerated { persisted },
        })
    }

    /// Code from a precompiled artifact shipped without source.
    pub fn load_compiled(&self, bytes: &[u8], origin: &str) -> Result<CodeObject, CacheError> {
        let expected = self.compiler.magic();
        match split_artifact(bytes, expected) {
            Ok((_, payload)) => Ok(CodeObject(payload.to_vec())),
            Err(found) => Err(CacheError::BadMagic {
                path: origin.to_owned(),
                expected,
                found,
            }),
        }
    }
}

fn source_hash(source: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(source);
    let mut out = [0_u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Source text that is only read when a compile is actually needed.
enum LazySource<F> {
    Unread(F),
    Read(Vec<u8>),
}

impl<F> LazySource<F>
where
    F: FnOnce() -> Result<Vec<u8>, CacheError>,
{
    fn into_bytes(self) -> Result<Vec<u8>, CacheError> {
        match self {
            LazySource::Unread(read) => read(),
            LazySource::Read(bytes) => Ok(bytes),
        }
    }
}
