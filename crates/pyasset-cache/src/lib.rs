//! On-disk caches backing archive imports.
//!
//! Two caches live here, with deliberately different failure policies:
//! - [`BytecodeCache`] validates and regenerates compiled-code artifacts next to the
//!   logical location of a source module (`__pycache__/<stem>.<tag>.pyc`). Writes are
//!   best-effort: a failed write never fails the import, since a valid in-memory code
//!   payload already exists.
//! - [`ExtractionCache`] materializes archive entries as real files (native modules and
//!   data resources). Write failures are always surfaced because there is no fallback.
//!
//! ## Artifact layout
//!
//! ```text
//! [4-byte magic][4-byte flags, LE][8-byte invalidation key][serialized code]
//! ```
//!
//! With `flags == 0` the key is `mtime as u32 LE` followed by `size as u32 LE` of the source
//! entry. With the hash flag set, the key is a truncated SHA-256 of the source text.

mod bytecode;
mod error;
mod extract;
mod header;
mod lock;
mod util;

pub use bytecode::{
    cache_path_for, BytecodeCache, CacheStatus, CodeObject, CompileError, Compiler, FreshCode,
    InvalidationMode, SourceStamp,
};
pub use error::CacheError;
pub use extract::{ExtractOutcome, ExtractionCache};
pub use header::{
    split_artifact, CacheHeader, InvalidationKey, FLAG_CHECK_SOURCE, FLAG_HASH_BASED, HEADER_LEN,
};
pub use lock::PathLock;
pub use util::atomic_write;
