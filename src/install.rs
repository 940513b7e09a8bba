use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{KegError, KegResult};
use crate::formula::{Formula, InstallTarget};
use crate::record::{InstallKind, InstallationRecord};

/// Name of the per-formula "current version" pointer inside the prefix.
pub const CURRENT_POINTER: &str = "current";
/// Provenance metadata written alongside the installed content.
pub const PROVENANCE_FILE: &str = ".keg-provenance.json";

/// The default per-user cellar directory.
pub fn default_prefix() -> KegResult<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "keg", "keg")
        .ok_or_else(|| KegError::Install("could not determine a data directory".to_string()))?;
    Ok(dirs.data_dir().join("cellar"))
}

/// Copies the formula's install targets from a build (or unpacked bottle)
/// tree into `<prefix>/<name>/<version>/`, then atomically flips the
/// `current` pointer and writes the receipt.
///
/// All copying happens in a private staging directory first; the pointer
/// flip is the single commit point. A failure anywhere before it leaves the
/// previously active version untouched. Re-installing the same version is
/// idempotent.
pub fn install(
    prefix: &Path,
    formula: &Formula,
    kind: InstallKind,
    checksum: &str,
    tree: &Path,
) -> KegResult<InstallationRecord> {
    let formula_dir = prefix.join(&formula.name);
    std::fs::create_dir_all(&formula_dir)
        .map_err(|e| KegError::Install(format!("creating '{}': {e}", formula_dir.display())))?;

    let staging = formula_dir.join(format!(".staging-{}", formula.version));
    if staging.exists() {
        // Leftover from a crashed run; it was never published.
        std::fs::remove_dir_all(&staging)
            .map_err(|e| KegError::Install(format!("clearing stale staging: {e}")))?;
    }
    std::fs::create_dir_all(&staging)
        .map_err(|e| KegError::Install(format!("creating staging: {e}")))?;

    let record = InstallationRecord::new(formula, kind, checksum, prefix);
    let outcome = populate_staging(&staging, formula, &record, tree);
    if let Err(e) = outcome {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let version_dir = formula_dir.join(&formula.version);
    swap_in(&staging, &version_dir)?;
    flip_current(&formula_dir, &formula.version)?;
    record.save()?;
    Ok(record)
}

/// Removes an installed formula, returning the receipt it had, if any.
pub fn uninstall(prefix: &Path, name: &str) -> KegResult<Option<InstallationRecord>> {
    let record = InstallationRecord::load(prefix, name)?;
    let formula_dir = prefix.join(name);
    if formula_dir.exists() {
        std::fs::remove_dir_all(&formula_dir)
            .map_err(|e| KegError::Install(format!("removing '{}': {e}", formula_dir.display())))?;
    }
    Ok(record)
}

/// Receipts of everything installed under the prefix, sorted by name.
pub fn list(prefix: &Path) -> KegResult<Vec<InstallationRecord>> {
    let mut records = Vec::new();
    if !prefix.exists() {
        return Ok(records);
    }
    for entry in std::fs::read_dir(prefix)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(record) = InstallationRecord::load(prefix, &name)? {
            records.push(record);
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

/// The directory the `current` pointer designates, or `None` when the
/// formula is not installed.
pub fn current_dir(prefix: &Path, name: &str) -> Option<PathBuf> {
    let pointer = prefix.join(name).join(CURRENT_POINTER);
    #[cfg(unix)]
    {
        pointer.exists().then_some(pointer)
    }
    #[cfg(not(unix))]
    {
        let version = std::fs::read_to_string(&pointer).ok()?;
        let dir = prefix.join(name).join(version.trim());
        dir.exists().then_some(dir)
    }
}

fn populate_staging(
    staging: &Path,
    formula: &Formula,
    record: &InstallationRecord,
    tree: &Path,
) -> KegResult<()> {
    for target in &formula.install_targets {
        copy_target(tree, staging, target)?;
    }
    let provenance = serde_json::to_string_pretty(record)
        .map_err(|e| KegError::Install(format!("serializing provenance: {e}")))?;
    std::fs::write(staging.join(PROVENANCE_FILE), provenance)
        .map_err(|e| KegError::Install(format!("writing provenance: {e}")))?;
    // Every target must be present in staging before anything is published.
    for target in &formula.install_targets {
        if !staging.join(&target.dest).exists() {
            return Err(KegError::Install(format!(
                "staged target '{}' missing after copy",
                target.dest
            )));
        }
    }
    Ok(())
}

fn copy_target(tree: &Path, staging: &Path, target: &InstallTarget) -> KegResult<()> {
    let src = tree.join(&target.src);
    if !src.exists() {
        return Err(KegError::Install(format!(
            "install target '{}' not found in build tree",
            target.src
        )));
    }
    let dest = staging.join(&target.dest);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| KegError::Install(format!("creating '{}': {e}", parent.display())))?;
    }
    if src.is_dir() {
        copy_tree(&src, &dest)
    } else {
        std::fs::copy(&src, &dest)
            .map_err(|e| KegError::Install(format!("copying '{}': {e}", src.display())))?;
        Ok(())
    }
}

fn copy_tree(src: &Path, dest: &Path) -> KegResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| KegError::Install(format!("walking build tree: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| KegError::Install(format!("walking build tree: {e}")))?;
        let out = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out)
                .map_err(|e| KegError::Install(format!("creating '{}': {e}", out.display())))?;
        } else {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| KegError::Install(format!("creating '{}': {e}", parent.display())))?;
            }
            std::fs::copy(entry.path(), &out)
                .map_err(|e| KegError::Install(format!("copying '{}': {e}", entry.path().display())))?;
        }
    }
    Ok(())
}

/// Moves a fully populated staging directory into place as the version
/// directory. An existing same-version directory is rotated out first, so a
/// re-install converges on the same end state.
///
/// On a same-version re-install the `current` pointer dangles between the
/// two renames. The pointer is restored by [`flip_current`] before the run
/// reports success, and a crash inside the window leaves the retired copy
/// intact under `.retired-<version>` next to the staging directory.
fn swap_in(staging: &Path, version_dir: &Path) -> KegResult<()> {
    if version_dir.exists() {
        let name = version_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let retired = version_dir.with_file_name(format!(".retired-{name}"));
        if retired.exists() {
            std::fs::remove_dir_all(&retired)
                .map_err(|e| KegError::Install(format!("clearing '{}': {e}", retired.display())))?;
        }
        std::fs::rename(version_dir, &retired)
            .map_err(|e| KegError::Install(format!("retiring old version: {e}")))?;
        std::fs::rename(staging, version_dir)
            .map_err(|e| KegError::Install(format!("publishing version: {e}")))?;
        std::fs::remove_dir_all(&retired)
            .map_err(|e| KegError::Install(format!("removing retired version: {e}")))?;
    } else {
        std::fs::rename(staging, version_dir)
            .map_err(|e| KegError::Install(format!("publishing version: {e}")))?;
    }
    Ok(())
}

/// Points `current` at the given version with a single atomic rename: a
/// fresh link (or marker file) is created under a temporary name, then
/// renamed over the pointer. Readers never observe a half-updated pointer.
fn flip_current(formula_dir: &Path, version: &str) -> KegResult<()> {
    let pointer = formula_dir.join(CURRENT_POINTER);
    let tmp = formula_dir.join(format!(".{}-new", CURRENT_POINTER));
    if tmp.exists() || tmp.is_symlink() {
        let _ = std::fs::remove_file(&tmp);
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(version, &tmp)
        .map_err(|e| KegError::Install(format!("creating current link: {e}")))?;
    #[cfg(not(unix))]
    std::fs::write(&tmp, version)
        .map_err(|e| KegError::Install(format!("creating current marker: {e}")))?;
    std::fs::rename(&tmp, &pointer)
        .map_err(|e| KegError::Install(format!("flipping current pointer: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Source;
    use std::collections::BTreeMap;

    fn formula(targets: &[(&str, &str)]) -> Formula {
        Formula {
            name: "tool".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            homepage: String::new(),
            license: String::new(),
            source: Source {
                url: "https://example.com/tool.tar.gz".to_string(),
                sha256: "a".repeat(64),
            },
            bottle_root: None,
            bottles: BTreeMap::new(),
            build_dependencies: vec![],
            build_steps: vec![],
            install_targets: targets
                .iter()
                .map(|(src, dest)| InstallTarget {
                    src: src.to_string(),
                    dest: dest.to_string(),
                })
                .collect(),
            test: None,
        }
    }

    fn build_tree(dir: &Path) -> PathBuf {
        let tree = dir.join("tree");
        std::fs::create_dir_all(tree.join("docs")).unwrap();
        std::fs::write(tree.join("tool"), "#!/bin/sh\necho ok\n").unwrap();
        std::fs::write(tree.join("docs").join("README"), "docs\n").unwrap();
        tree
    }

    #[test]
    fn test_install_publishes_version_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cellar");
        let tree = build_tree(dir.path());
        let f = formula(&[("tool", "bin/tool"), ("docs", "share/docs")]);

        let record = install(&prefix, &f, InstallKind::Source, &"a".repeat(64), &tree).unwrap();
        assert_eq!(record.version, "1.0.0");

        let version_dir = prefix.join("tool").join("1.0.0");
        assert!(version_dir.join("bin/tool").exists());
        assert!(version_dir.join("share/docs/README").exists());
        assert!(version_dir.join(PROVENANCE_FILE).exists());

        let current = current_dir(&prefix, "tool").unwrap();
        assert!(current.join("bin/tool").exists());
        assert!(InstallationRecord::load(&prefix, "tool").unwrap().is_some());
    }

    #[test]
    fn test_missing_target_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cellar");
        let tree = build_tree(dir.path());
        let f = formula(&[("tool", "bin/tool"), ("no-such-file", "bin/other")]);

        let err = install(&prefix, &f, InstallKind::Source, &"a".repeat(64), &tree).unwrap_err();
        assert!(matches!(err, KegError::Install(_)));
        assert!(!prefix.join("tool").join("1.0.0").exists());
        assert!(current_dir(&prefix, "tool").is_none());
        assert!(InstallationRecord::load(&prefix, "tool").unwrap().is_none());
    }

    #[test]
    fn test_reinstall_same_version_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cellar");
        let tree = build_tree(dir.path());
        let f = formula(&[("tool", "bin/tool")]);

        install(&prefix, &f, InstallKind::Source, &"a".repeat(64), &tree).unwrap();
        install(&prefix, &f, InstallKind::Source, &"a".repeat(64), &tree).unwrap();

        let formula_dir = prefix.join("tool");
        let mut entries: Vec<String> = std::fs::read_dir(&formula_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["1.0.0", "current", "receipt.json"]);
        let current = current_dir(&prefix, "tool").unwrap();
        assert!(current.join("bin/tool").exists());
    }

    #[test]
    fn test_failed_upgrade_keeps_previous_version_current() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cellar");
        let tree = build_tree(dir.path());
        let f = formula(&[("tool", "bin/tool")]);
        install(&prefix, &f, InstallKind::Source, &"a".repeat(64), &tree).unwrap();

        let mut upgrade = formula(&[("gone", "bin/tool")]);
        upgrade.version = "2.0.0".to_string();
        let err =
            install(&prefix, &upgrade, InstallKind::Source, &"b".repeat(64), &tree).unwrap_err();
        assert!(matches!(err, KegError::Install(_)));

        // The flip never happened: 1.0.0 is still the active version.
        let current = current_dir(&prefix, "tool").unwrap();
        assert!(current.join("bin/tool").exists());
        let record = InstallationRecord::load(&prefix, "tool").unwrap().unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(!prefix.join("tool").join("2.0.0").exists());
    }

    #[test]
    fn test_uninstall_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cellar");
        let tree = build_tree(dir.path());
        let f = formula(&[("tool", "bin/tool")]);
        install(&prefix, &f, InstallKind::Bottle, &"a".repeat(64), &tree).unwrap();

        let record = uninstall(&prefix, "tool").unwrap().unwrap();
        assert_eq!(record.kind, InstallKind::Bottle);
        assert!(!prefix.join("tool").exists());
        assert!(uninstall(&prefix, "tool").unwrap().is_none());
    }

    #[test]
    fn test_list_reads_receipts() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cellar");
        let tree = build_tree(dir.path());
        let mut a = formula(&[("tool", "bin/tool")]);
        a.name = "alpha".to_string();
        let mut b = formula(&[("tool", "bin/tool")]);
        b.name = "beta".to_string();
        install(&prefix, &b, InstallKind::Source, &"a".repeat(64), &tree).unwrap();
        install(&prefix, &a, InstallKind::Bottle, &"b".repeat(64), &tree).unwrap();

        let records = list(&prefix).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
