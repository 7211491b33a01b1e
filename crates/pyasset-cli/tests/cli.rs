use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use pyasset_test_utils::BundleBuilder;

fn pyasset() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pyasset"));
    cmd.env_remove("PYASSET_EXTRACT_DIR").env_remove("RUST_LOG");
    cmd
}

fn pyc(source: &str) -> Vec<u8> {
    let mut bytes = vec![0x55, 0x0d, 0x0d, 0x0a];
    bytes.extend_from_slice(&[0; 12]);
    bytes.extend_from_slice(source.as_bytes());
    bytes
}

/// Writes `app.zip` and `requirements-common.zip` and returns a command preconfigured with
/// both bundles and an extraction root inside `temp`.
fn with_bundles(temp: &TempDir) -> Command {
    BundleBuilder::new()
        .file("hello.py", "print('hello')\n")
        .file("pkg/__init__.py", "")
        .file("pkg/data.txt", "payload\n")
        .write(&temp.path().join("app.zip"));
    BundleBuilder::new()
        .file("murmurhash/__init__.pyc", pyc(""))
        .file("murmurhash/about.pyc", pyc("__summary__ = ''"))
        .file("murmurhash/mrmr.pxd", "cdef extern\n")
        .stored("murmurhash/mrmr.so", b"\x7fELF")
        .file("murmurhash/tests/__init__.pyc", pyc(""))
        .file("murmurhash/tests/test_import.pyc", pyc(""))
        .write(&temp.path().join("requirements-common.zip"));

    let mut cmd = pyasset();
    cmd.arg("--bundle")
        .arg(temp.path().join("app.zip"))
        .arg("--bundle")
        .arg(temp.path().join("requirements-common.zip"))
        .arg("--extract-root")
        .arg(temp.path().join("assets"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.arg("--json").output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn help_mentions_core_commands() {
    pyasset().arg("--help").assert().success().stdout(
        predicate::str::contains("resolve")
            .and(predicate::str::contains("modules"))
            .and(predicate::str::contains("list"))
            .and(predicate::str::contains("extract")),
    );
}

#[test]
fn resolve_reports_compiled_module_paths() {
    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets/requirements/murmurhash");

    let v = json_stdout(with_bundles(&temp).args(["resolve", "murmurhash.about"]));
    assert_eq!(v["kind"], "compiled");
    assert_eq!(
        v["file"].as_str().unwrap(),
        assets.join("about.py").to_str().unwrap()
    );
    assert_eq!(
        v["origin"].as_str().unwrap(),
        assets.join("about.pyc").to_str().unwrap()
    );
    assert!(v["cached"].is_null());
    assert!(v["search_locations"].is_null());
}

#[test]
fn resolve_source_module_reports_cache_location() {
    let temp = TempDir::new().unwrap();
    with_bundles(&temp)
        .args(["resolve", "hello"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("hello: source")
                .and(predicate::str::contains("__pycache__"))
                .and(predicate::str::contains("hello.cpython-38.pyc")),
        );
}

#[test]
fn missing_modules_exit_with_code_2() {
    let temp = TempDir::new().unwrap();
    with_bundles(&temp)
        .args(["resolve", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No module named 'nope'"));
}

#[test]
fn empty_search_path_is_an_error() {
    pyasset()
        .args(["modules"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("search path is empty"));
}

#[test]
fn modules_walks_subpackages() {
    let temp = TempDir::new().unwrap();
    let v = json_stdout(with_bundles(&temp).args(["modules", "murmurhash", "--recursive"]));
    let names: Vec<_> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(
        names,
        [
            "murmurhash.about",
            "murmurhash.mrmr",
            "murmurhash.tests",
            "murmurhash.tests.test_import",
        ]
    );

    with_bundles(&temp)
        .args(["modules", "murmurhash.about"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("'murmurhash.about' is not a package"));
}

#[test]
fn list_prints_package_resources() {
    let temp = TempDir::new().unwrap();
    with_bundles(&temp)
        .args(["list", "murmurhash"])
        .assert()
        .success()
        .stdout("__init__.pyc\nabout.pyc\nmrmr.pxd\nmrmr.so\ntests\n");
}

#[test]
fn extract_package_data_is_idempotent() {
    let temp = TempDir::new().unwrap();

    let v = json_stdout(with_bundles(&temp).args(["extract", "murmurhash"]));
    assert_eq!(v["extracted"], 1);
    temp.child("assets/requirements/murmurhash/mrmr.pxd")
        .assert("cdef extern\n");
    temp.child("assets/requirements/murmurhash/mrmr.so")
        .assert(predicate::path::missing());

    let v = json_stdout(with_bundles(&temp).args(["extract", "murmurhash"]));
    assert_eq!(v["extracted"], 0);
    assert_eq!(v["paths"].as_array().unwrap().len(), 1);
}

#[test]
fn extract_native_module_and_resource() {
    let temp = TempDir::new().unwrap();

    with_bundles(&temp)
        .args(["extract", "murmurhash.mrmr"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mrmr.so"));
    temp.child("assets/requirements/murmurhash/mrmr.so")
        .assert(predicate::path::is_file());

    with_bundles(&temp)
        .args(["extract", "pkg", "data.txt"])
        .assert()
        .success();
    temp.child("assets/app/pkg/data.txt").assert("payload\n");

    with_bundles(&temp)
        .args(["extract", "hello"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("'hello' is a source module"));
}

#[test]
fn config_file_paths_are_relative_to_the_file() {
    let temp = TempDir::new().unwrap();
    BundleBuilder::new()
        .file("pkg/__init__.py", "")
        .file("pkg/data.txt", "payload\n")
        .write(&temp.path().join("bundles/app.zip"));
    temp.child("pyasset.toml")
        .write_str(
            r#"extract_root = "assets"

[[search_path]]
bundle = "bundles/app.zip"

[logging]
level = "warn"
"#,
        )
        .unwrap();

    pyasset()
        .arg("--config")
        .arg(temp.path().join("pyasset.toml"))
        .args(["extract", "pkg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("summary: 1 extracted, 0 up to date"));
    temp.child("assets/app/pkg/data.txt").assert("payload\n");
}

#[test]
fn invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    temp.child("pyasset.toml")
        .write_str("unknown_key = 1\n")
        .unwrap();

    pyasset()
        .arg("--config")
        .arg(temp.path().join("pyasset.toml"))
        .arg("modules")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load config"));
}
