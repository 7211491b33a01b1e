#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pyasset_cache::{CompileError, Compiler};
use pyasset_config::{PyAssetConfig, SearchPathConfig};
use pyasset_import::Importer;
use pyasset_test_utils::BundleBuilder;
use tempfile::TempDir;

pub const MAGIC: [u8; 4] = [0x55, 0x0d, 0x0d, 0x0a];

/// "Compiles" source by prefixing it with `code:`. Sources starting with `def` and lacking a
/// `:` are syntax errors on line 1.
#[derive(Default)]
pub struct FakeCompiler {
    compiles: AtomicUsize,
}

impl FakeCompiler {
    pub fn compiles(&self) -> usize {
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

/// A precompiled artifact as shipped in requirement bundles.
pub fn pyc(source: &str) -> Vec<u8> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&[0; 12]);
    bytes.extend_from_slice(b"code:");
    bytes.extend_from_slice(source.as_bytes());
    bytes
}

pub const ANDROID1_INIT: &str = "# This package is used by test_android.\nx = 1\n";

pub struct Fixture {
    pub tmp: TempDir,
    pub compiler: Arc<FakeCompiler>,
    pub importer: Importer,
    pub config: PyAssetConfig,
}

impl Fixture {
    pub fn extract_root(&self) -> PathBuf {
        self.tmp.path().join("files/assets")
    }

    /// Logical path of `rel` inside the bundle mounted at `mount`.
    pub fn asset_path(&self, mount: &str, rel: &str) -> PathBuf {
        let mut path = self.extract_root().join(mount);
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    pub fn site_dir(&self) -> PathBuf {
        self.tmp.path().join("site-packages")
    }
}

fn write_bundles(dir: &Path) {
    BundleBuilder::new()
        .file("android1/__init__.py", ANDROID1_INIT)
        .file("android1/mod1.py", "x = \"android1.mod1\"\n")
        .file("android1/a.txt", "alpha\n")
        .stored("android1/b.so", "bravo\n")
        .file("android1/subdir/c.txt", "charlie\n")
        .file("imp_rename_one.py", "ID = \"1\"\n")
        .file("imp_rename_two/__init__.py", "ID = \"2\"\n")
        .file("imp_rename_two/mod_one.py", "ID = \"21\"\n")
        .file("imp_rename_two/pkg_two/__init__.py", "ID = \"22\"\n")
        .file("imp_rename_two/mod_three.py", "ID = \"23\"\n")
        .file("nspkg/a.py", "side = \"app\"\n")
        .file("shadow.py", "origin = \"app\"\n")
        .file("syntax_error.py", "def f(\n")
        .write(&dir.join("app.zip"));

    BundleBuilder::new()
        .file("murmurhash/__init__.pyc", pyc("def get_include(): pass"))
        .file("murmurhash/__init__.pxd", "")
        .file("murmurhash/about.pyc", pyc("__summary__ = 'murmurhash'"))
        .file("murmurhash/mrmr.pxd", "from libc.stdint cimport uint32_t\n")
        .file("murmurhash/mrmr.pyx", "# cython: profile=False\n")
        .file("murmurhash/include/murmurhash/MurmurHash2.h", "#pragma once\n")
        .file("murmurhash/include/murmurhash/MurmurHash3.h", "#pragma once\n")
        .file("murmurhash/tests/__init__.pyc", pyc(""))
        .file("murmurhash/tests/test_import.pyc", pyc("import murmurhash"))
        .file("nspkg/b.py", "side = \"requirements\"\n")
        .file("shadow.py", "origin = \"requirements-common\"\n")
        .file("both_requirements.py", "origin = \"common\"\n")
        .file("common_only.py", "origin = \"common\"\n")
        .write(&dir.join("requirements-common.zip"));

    BundleBuilder::new()
        .stored("murmurhash/mrmr.so", b"\x7fELF murmurhash")
        .file("both_requirements.py", "origin = \"abi\"\n")
        .stored("abi_only.so", b"\x7fELF abi_only")
        .write(&dir.join("requirements-arm64.zip"));

    BundleBuilder::new()
        .file("json/__init__.pyc", pyc("def loads(s): pass"))
        .file("argparse.pyc", pyc("class ArgumentParser: pass"))
        .file("shadow.py", "origin = \"stdlib\"\n")
        .write(&dir.join("stdlib-common.zip"));
}

fn write_site_packages(dir: &Path) {
    std::fs::create_dir_all(dir.join("fspkg")).unwrap();
    std::fs::write(dir.join("fsmod.py"), "x = \"fsmod\"\n").unwrap();
    std::fs::write(dir.join("fspkg/__init__.py"), "").unwrap();
    std::fs::write(dir.join("fspkg/data.txt"), "delta\n").unwrap();
    std::fs::write(dir.join("fsnative.so"), b"\x7fELF fsnative").unwrap();
}

pub fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let bundles = tmp.path().join("bundles");
    write_bundles(&bundles);
    write_site_packages(&tmp.path().join("site-packages"));

    let mut stdlib = SearchPathConfig::bundle(bundles.join("stdlib-common.zip"));
    stdlib.relocatable = false;
    let config = PyAssetConfig {
        extract_root: tmp.path().join("files/assets"),
        search_path: vec![
            SearchPathConfig::bundle(bundles.join("app.zip")),
            SearchPathConfig::bundle(bundles.join("requirements-common.zip")),
            SearchPathConfig::bundle(bundles.join("requirements-arm64.zip")),
            stdlib,
            SearchPathConfig::directory(tmp.path().join("site-packages")),
        ],
        ..PyAssetConfig::default()
    };

    let compiler = Arc::new(FakeCompiler::default());
    let importer = Importer::from_config(&config, compiler.clone()).unwrap();
    Fixture {
        tmp,
        compiler,
        importer,
        config,
    }
}
