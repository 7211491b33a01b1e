use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pyasset_cache::{
    cache_path_for, BytecodeCache, CacheError, CacheHeader, CacheStatus, CompileError, Compiler,
    InvalidationMode, SourceStamp, HEADER_LEN,
};
use pyasset_test_utils::{backdate, mtime_of, FIXTURE_MTIME_SECS};
use tempfile::TempDir;

const MAGIC: [u8; 4] = [0x55, 0x0d, 0x0d, 0x0a];

/// Stand-in for the host compiler: "code" is the source prefixed with a marker.
#[derive(Default)]
struct FakeCompiler {
    compiles: AtomicUsize,
}

impl FakeCompiler {
    fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl Compiler for FakeCompiler {
    fn magic(&self) -> [u8; 4] {
        MAGIC
    }

    fn compile(&self, source: &[u8], filename: &str) -> Result<Vec<u8>, CompileError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if source.starts_with(b"def") && !source.contains(&b':') {
            return Err(CompileError {
                filename: filename.to_owned(),
                line: Some(1),
                message: "invalid syntax".to_owned(),
            });
        }
        let mut code = b"code:".to_vec();
        code.extend_from_slice(source);
        Ok(code)
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

struct Fixture {
    _tmp: TempDir,
    compiler: Arc<FakeCompiler>,
    cache: BytecodeCache,
    cache_path: PathBuf,
}

fn fixture(mode: InvalidationMode) -> Fixture {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let compiler = Arc::new(FakeCompiler::default());
    let cache = BytecodeCache::new(compiler.clone()).with_mode(mode);
    let cache_path = cache_path_for(
        &tmp.path().join("app/chaquopy/test/pyc_test.py"),
        "cpython-38",
    )
    .unwrap();
    Fixture {
        _tmp: tmp,
        compiler,
        cache,
        cache_path,
    }
}

const SOURCE: &[u8] = b"x = 1\n";

fn stamp() -> SourceStamp {
    SourceStamp {
        mtime: FIXTURE_MTIME_SECS,
        size: SOURCE.len() as u64,
    }
}

fn load(fx: &Fixture, stamp: SourceStamp, source: &'static [u8]) -> pyasset_cache::FreshCode {
    fx.cache
        .ensure_fresh(stamp, "chaquopy/test/pyc_test.py", &fx.cache_path, || {
            Ok(source.to_vec())
        })
        .unwrap()
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[test]
fn first_load_compiles_and_writes_artifact() {
    let fx = fixture(InvalidationMode::Timestamp);

    let fresh = load(&fx, stamp(), SOURCE);
    assert_eq!(fresh.status, CacheStatus::Regenerated { persisted: true });
    assert_eq!(fresh.code.as_bytes(), b"code:x = 1\n");
    assert_eq!(fx.compiler.compiles(), 1);

    let artifact = read(&fx.cache_path);
    let header = CacheHeader::parse(&artifact).unwrap();
    assert_eq!(
        header,
        CacheHeader::timestamp(MAGIC, FIXTURE_MTIME_SECS, SOURCE.len() as u64)
    );
    assert_eq!(&artifact[HEADER_LEN..], b"code:x = 1\n");
}

#[test]
fn valid_artifact_is_not_rewritten() {
    let fx = fixture(InvalidationMode::Timestamp);
    load(&fx, stamp(), SOURCE);
    let before = backdate(&fx.cache_path, 3600);

    let fresh = load(&fx, stamp(), SOURCE);
    assert_eq!(fresh.status, CacheStatus::Hit);
    assert_eq!(fx.compiler.compiles(), 1);
    assert_eq!(mtime_of(&fx.cache_path), before);
}

#[test]
fn matching_header_trusts_payload() {
    let fx = fixture(InvalidationMode::Timestamp);
    load(&fx, stamp(), SOURCE);

    // Replace the body but keep a header that still matches the source entry.
    let mut artifact = read(&fx.cache_path)[..HEADER_LEN].to_vec();
    artifact.extend_from_slice(b"code:check_py_attr = 2\n");
    std::fs::write(&fx.cache_path, &artifact).unwrap();

    let fresh = load(&fx, stamp(), SOURCE);
    assert_eq!(fresh.status, CacheStatus::Hit);
    assert_eq!(fresh.code.as_bytes(), b"code:check_py_attr = 2\n");
    assert_eq!(fx.compiler.compiles(), 1);
}

#[test]
fn tampered_header_is_regenerated_once() {
    let fx = fixture(InvalidationMode::Timestamp);
    load(&fx, stamp(), SOURCE);
    let original = read(&fx.cache_path);

    let mut tampered = original.clone();
    tampered[8] ^= 0xff;
    tampered.truncate(HEADER_LEN);
    tampered.extend_from_slice(b"code:check_py_attr = 2\n");
    std::fs::write(&fx.cache_path, &tampered).unwrap();

    let fresh = load(&fx, stamp(), SOURCE);
    assert_eq!(fresh.status, CacheStatus::Regenerated { persisted: true });
    assert_eq!(fresh.code.as_bytes(), b"code:x = 1\n");
    assert_eq!(read(&fx.cache_path), original);

    let again = load(&fx, stamp(), SOURCE);
    assert_eq!(again.status, CacheStatus::Hit);
    assert_eq!(fx.compiler.compiles(), 2);
}

#[test]
fn wrong_magic_is_stale() {
    let fx = fixture(InvalidationMode::Timestamp);
    load(&fx, stamp(), SOURCE);

    let mut artifact = read(&fx.cache_path);
    artifact[0] = 0x42;
    std::fs::write(&fx.cache_path, &artifact).unwrap();

    let fresh = load(&fx, stamp(), SOURCE);
    assert!(matches!(fresh.status, CacheStatus::Regenerated { .. }));
    assert_eq!(&read(&fx.cache_path)[..4], &MAGIC);
}

#[test]
fn newer_source_entry_invalidates() {
    let fx = fixture(InvalidationMode::Timestamp);
    load(&fx, stamp(), SOURCE);

    let newer = SourceStamp {
        mtime: FIXTURE_MTIME_SECS + 2,
        size: 6,
    };
    let fresh = load(&fx, newer, b"x = 2\n");
    assert_eq!(fresh.code.as_bytes(), b"code:x = 2\n");
    assert_eq!(
        CacheHeader::parse(&read(&fx.cache_path)).unwrap(),
        CacheHeader::timestamp(MAGIC, FIXTURE_MTIME_SECS + 2, 6)
    );
}

#[test]
fn truncated_artifact_is_stale() {
    let fx = fixture(InvalidationMode::Timestamp);
    std::fs::create_dir_all(fx.cache_path.parent().unwrap()).unwrap();
    std::fs::write(&fx.cache_path, &MAGIC).unwrap();

    let fresh = load(&fx, stamp(), SOURCE);
    assert_eq!(fresh.status, CacheStatus::Regenerated { persisted: true });
}

#[test]
fn write_failure_does_not_fail_the_load() {
    let fx = fixture(InvalidationMode::Timestamp);
    // A regular file where the `__pycache__` directory should go.
    let pycache = fx.cache_path.parent().unwrap();
    std::fs::create_dir_all(pycache.parent().unwrap()).unwrap();
    std::fs::write(pycache, b"not a directory").unwrap();

    let fresh = load(&fx, stamp(), SOURCE);
    assert_eq!(fresh.status, CacheStatus::Regenerated { persisted: false });
    assert_eq!(fresh.code.as_bytes(), b"code:x = 1\n");
    assert!(!fx.cache_path.exists());
}

#[test]
fn compile_errors_propagate() {
    let fx = fixture(InvalidationMode::Timestamp);
    let err = fx
        .cache
        .ensure_fresh(stamp(), "pkg/syntax_error.py", &fx.cache_path, || {
            Ok(b"def f(\n".to_vec())
        })
        .unwrap_err();

    match err {
        CacheError::Compile(err) => {
            assert_eq!(err.filename, "pkg/syntax_error.py");
            assert_eq!(err.line, Some(1));
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
    assert!(!fx.cache_path.exists());
}

#[test]
fn source_read_errors_propagate() {
    let fx = fixture(InvalidationMode::Timestamp);
    let err = fx
        .cache
        .ensure_fresh(stamp(), "pkg/mod.py", &fx.cache_path, || {
            Err(std::io::Error::other("boom").into())
        })
        .unwrap_err();
    assert!(matches!(err, CacheError::Io(_)), "{err}");
}

#[test]
fn checked_hash_ignores_timestamps() {
    let fx = fixture(InvalidationMode::CheckedHash);
    let first = load(&fx, stamp(), SOURCE);
    assert!(matches!(first.status, CacheStatus::Regenerated { .. }));

    let artifact = read(&fx.cache_path);
    assert_eq!(&artifact[4..8], &[3, 0, 0, 0]);

    let touched = SourceStamp {
        mtime: FIXTURE_MTIME_SECS + 100,
        size: SOURCE.len() as u64,
    };
    assert_eq!(load(&fx, touched, SOURCE).status, CacheStatus::Hit);

    let changed = load(&fx, touched, b"x = 3\n");
    assert!(matches!(changed.status, CacheStatus::Regenerated { .. }));
    assert_eq!(changed.code.as_bytes(), b"code:x = 3\n");
    assert_eq!(fx.compiler.compiles(), 2);
}

#[test]
fn timestamp_mode_rejects_hash_artifacts() {
    let fx = fixture(InvalidationMode::CheckedHash);
    load(&fx, stamp(), SOURCE);

    let timestamp_cache = BytecodeCache::new(fx.compiler.clone());
    let fresh = timestamp_cache
        .ensure_fresh(stamp(), "pyc_test.py", &fx.cache_path, || {
            Ok(SOURCE.to_vec())
        })
        .unwrap();
    assert!(matches!(fresh.status, CacheStatus::Regenerated { .. }));
    assert_eq!(&read(&fx.cache_path)[4..8], &[0, 0, 0, 0]);
}

#[test]
fn sourceless_artifacts_check_magic_only() {
    let fx = fixture(InvalidationMode::Timestamp);

    let mut artifact = CacheHeader::timestamp(MAGIC, 0, 0).to_bytes().to_vec();
    artifact.extend_from_slice(b"code:about");
    let code = fx
        .cache
        .load_compiled(&artifact, "murmurhash/about.pyc")
        .unwrap();
    assert_eq!(code.as_bytes(), b"code:about");

    let err = fx
        .cache
        .load_compiled(b"\x00\x00\x00\x00rest-of-file", "murmurhash/about.pyc")
        .unwrap_err();
    assert!(matches!(err, CacheError::BadMagic { .. }), "{err}");
    assert!(err.to_string().contains("murmurhash/about.pyc"));
}

fn counted_load(fx: &Fixture, reads: &AtomicUsize) -> CacheStatus {
    fx.cache
        .ensure_fresh(stamp(), "pyc_test.py", &fx.cache_path, || {
            reads.fetch_add(1, Ordering::SeqCst);
            Ok(SOURCE.to_vec())
        })
        .unwrap()
        .status
}

#[test]
fn source_is_read_at_most_once_per_load() {
    let fx = fixture(InvalidationMode::Timestamp);
    let reads = AtomicUsize::new(0);
    assert!(matches!(counted_load(&fx, &reads), CacheStatus::Regenerated { .. }));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    // A timestamp hit never touches the source.
    assert_eq!(counted_load(&fx, &reads), CacheStatus::Hit);
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    let fx = fixture(InvalidationMode::CheckedHash);
    let reads = AtomicUsize::new(0);
    assert!(matches!(counted_load(&fx, &reads), CacheStatus::Regenerated { .. }));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert_eq!(counted_load(&fx, &reads), CacheStatus::Hit);
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}
