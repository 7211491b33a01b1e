use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// In-process exclusive lock keyed by destination path.
///
/// Both caches rewrite shared on-disk artifacts; two writers for the same destination must
/// not interleave. Writers for different destinations never contend. The lock is released
/// when the value is dropped.
#[derive(Debug)]
pub struct PathLock {
    _guard: MutexGuard<'static, ()>,
}

impl PathLock {
    /// Block until no other holder exists for `path`.
    pub fn acquire(path: &Path) -> Self {
        let mutex = mutex_for_path(path);
        let guard = mutex
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self { _guard: guard }
    }
}

fn mutex_for_path(path: &Path) -> &'static Mutex<()> {
    static PATH_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PATH_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = map.get(path) {
        return existing;
    }

    // One small allocation per distinct destination for the life of the process.
    let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), mutex);
    mutex
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_path_is_mutually_exclusive() {
        let path = PathBuf::from("/pyasset/lock-test/same");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _lock = PathLock::acquire(&path);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_paths_do_not_contend() {
        let _a = PathLock::acquire(Path::new("/pyasset/lock-test/a"));
        let _b = PathLock::acquire(Path::new("/pyasset/lock-test/b"));
    }
}
