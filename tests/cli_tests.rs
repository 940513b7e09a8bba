#![cfg(unix)]

use std::collections::BTreeMap;
use std::path::Path;

use assert_cmd::Command;
use flate2::Compression;
use flate2::write::GzEncoder;
use keg::checksum;
use keg::formula::{Bottle, Formula, InstallTarget, Source, TestCommand};
use tempfile::tempdir;

fn make_bottle(out: &Path, contents: &str) -> String {
    let stage = tempdir().unwrap();
    let root = stage.path().join("tool-1.0.0");
    std::fs::create_dir_all(root.join("bin")).unwrap();
    std::fs::write(root.join("bin/tool"), contents).unwrap();
    let file = std::fs::File::create(out).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all("tool-1.0.0", &root).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    checksum::hash_file(out).unwrap()
}

fn write_formula(dir: &Path, bottle_sha: &str, bottle_url: &str, test: Option<TestCommand>) -> std::path::PathBuf {
    let formula = Formula {
        name: "tool".to_string(),
        version: "1.0.0".to_string(),
        description: "cli fixture".to_string(),
        homepage: "https://example.com/tool".to_string(),
        license: "MIT".to_string(),
        source: Source {
            url: "/nonexistent/source.tar.gz".to_string(),
            sha256: "a".repeat(64),
        },
        bottle_root: None,
        bottles: BTreeMap::from([(
            "linux-x86_64".to_string(),
            Bottle {
                sha256: bottle_sha.to_string(),
                url: Some(bottle_url.to_string()),
                any_os_version: false,
            },
        )]),
        build_dependencies: vec![],
        build_steps: vec![],
        install_targets: vec![InstallTarget {
            src: "bin/tool".to_string(),
            dest: "bin/tool".to_string(),
        }],
        test,
    };
    let path = dir.join("tool.toml");
    formula.save(&path).unwrap();
    path
}

fn keg() -> Command {
    Command::cargo_bin("keg").unwrap()
}

#[test]
fn test_install_list_which_uninstall_flow() {
    let dir = tempdir().unwrap();
    let bottle = dir.path().join("bottle.tar.gz");
    let sha = make_bottle(&bottle, "payload");
    let formula = write_formula(dir.path(), &sha, &bottle.to_string_lossy(), None);
    let prefix = dir.path().join("cellar");
    let staging = dir.path().join("staging");

    keg()
        .args(["install", formula.to_str().unwrap()])
        .args(["--prefix", prefix.to_str().unwrap()])
        .args(["--staging", staging.to_str().unwrap()])
        .args(["--platform", "linux-x86_64"])
        .assert()
        .success();
    assert!(prefix.join("tool/1.0.0/bin/tool").exists());

    let output = keg()
        .args(["list", "--prefix", prefix.to_str().unwrap(), "--verbose"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let listed = String::from_utf8_lossy(&output);
    assert!(listed.contains("tool: 1.0.0 (bottle)"));
    assert!(listed.contains(&sha));

    let output = keg()
        .args(["which", "tool", "--prefix", prefix.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("current"));

    keg()
        .args(["uninstall", "tool", "--prefix", prefix.to_str().unwrap()])
        .assert()
        .success();
    assert!(!prefix.join("tool").exists());

    keg()
        .args(["which", "tool", "--prefix", prefix.to_str().unwrap()])
        .assert()
        .code(1);
}

#[test]
fn test_degraded_install_exits_with_its_own_code() {
    let dir = tempdir().unwrap();
    let bottle = dir.path().join("bottle.tar.gz");
    let sha = make_bottle(&bottle, "payload");
    let test = TestCommand {
        cmd: vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()],
    };
    let formula = write_formula(dir.path(), &sha, &bottle.to_string_lossy(), Some(test));
    let prefix = dir.path().join("cellar");

    keg()
        .args(["install", formula.to_str().unwrap()])
        .args(["--prefix", prefix.to_str().unwrap()])
        .args(["--staging", dir.path().join("staging").to_str().unwrap()])
        .args(["--platform", "linux-x86_64"])
        .arg("--quiet")
        .assert()
        .code(2);
    // Degraded, not failed: the artifact is installed.
    assert!(prefix.join("tool/1.0.0/bin/tool").exists());
}

#[test]
fn test_checksum_mismatch_exits_with_its_own_code() {
    let dir = tempdir().unwrap();
    let bottle = dir.path().join("bottle.tar.gz");
    make_bottle(&bottle, "payload");
    let wrong = "e".repeat(64);
    let formula = write_formula(dir.path(), &wrong, &bottle.to_string_lossy(), None);
    let prefix = dir.path().join("cellar");

    keg()
        .args(["install", formula.to_str().unwrap()])
        .args(["--prefix", prefix.to_str().unwrap()])
        .args(["--staging", dir.path().join("staging").to_str().unwrap()])
        .args(["--platform", "linux-x86_64"])
        .assert()
        .code(12);
    assert!(!prefix.join("tool").exists());
}

#[test]
fn test_info_prints_metadata_without_installing() {
    let dir = tempdir().unwrap();
    let bottle = dir.path().join("bottle.tar.gz");
    let sha = make_bottle(&bottle, "payload");
    let formula = write_formula(dir.path(), &sha, &bottle.to_string_lossy(), None);

    let output = keg()
        .args(["info", formula.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let printed = String::from_utf8_lossy(&output);
    assert!(printed.contains("tool 1.0.0"));
    assert!(printed.contains("https://example.com/tool"));
    assert!(printed.contains("linux-x86_64"));
}

#[test]
fn test_missing_formula_file_is_an_error() {
    keg()
        .args(["install", "/nonexistent/formula.toml"])
        .assert()
        .failure();
}
