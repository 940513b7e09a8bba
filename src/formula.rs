use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksum::is_hex_64;
use crate::error::{KegError, KegResult};

/// A declarative description of a single installable unit.
///
/// A formula names a canonical source archive plus, optionally, a table of
/// prebuilt per-platform bottles. The orchestrator picks exactly one of the
/// two paths per run: a verified bottle, or a sandboxed build from source.
/// Parsing the authoring language is out of scope here; this is the record
/// a loader hands over, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// The name of the installable unit. Must be non-empty.
    pub name: String,
    /// The version being installed (semantic versioning).
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub license: String,
    /// Base URL bottles are fetched from when a bottle entry carries no URL
    /// of its own. The full URL is `<root>/<name>-<version>-<platform>.tar.gz`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottle_root: Option<String>,
    /// Executables that must be present before a source build starts.
    /// These are preconditions satisfied by an external resolver; the
    /// orchestrator only asserts they can be located.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_dependencies: Vec<String>,
    /// Location and expected hash of the canonical source archive.
    pub source: Source,
    /// Prebuilt artifacts keyed by platform (`<os>-<ver>-<arch>` or `<os>-<arch>`).
    /// An empty table simply means every platform builds from source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bottles: BTreeMap<String, Bottle>,
    /// Commands run in order inside the build sandbox on the source path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_steps: Vec<BuildStep>,
    /// Files copied from the build tree into the versioned prefix.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_targets: Vec<InstallTarget>,
    /// Post-install smoke test. `{prefix}` in arguments expands to the
    /// formula's `current` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub sha256: String,
}

/// A precomputed, platform-specific build artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottle {
    /// Expected SHA-256 of the bottle archive.
    pub sha256: String,
    /// Explicit download URL. Defaults to one derived from `bottle_root`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Marks a version-keyed bottle as usable on other versions of the same
    /// OS family. Cross-version reuse never happens without this marker.
    #[serde(default)]
    pub any_os_version: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStep {
    /// Program followed by its arguments.
    pub cmd: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallTarget {
    /// Path relative to the build (or unpacked bottle) tree.
    pub src: String,
    /// Path relative to the versioned install directory.
    pub dest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCommand {
    pub cmd: Vec<String>,
}

impl Formula {
    /// Loads a formula from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> KegResult<Formula> {
        let content = std::fs::read_to_string(&path)?;
        let formula: Formula = toml::from_str(&content)
            .map_err(|e| KegError::Configuration(format!("invalid formula: {e}")))?;
        Ok(formula)
    }

    /// Saves the formula to the given path in pretty TOML format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> KegResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KegError::Configuration(format!("unserializable formula: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks the formula for the mistakes that must be caught before the
    /// pipeline mutates anything: empty names, malformed hashes, empty
    /// commands, escaping install destinations, bottles without a URL source.
    pub fn validate(&self) -> KegResult<()> {
        if self.name.trim().is_empty() {
            return Err(KegError::Configuration("formula name is empty".to_string()));
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(KegError::Configuration(format!(
                "invalid version '{}'",
                self.version
            )));
        }
        if !is_hex_64(&self.source.sha256) {
            return Err(KegError::Configuration(format!(
                "source sha256 '{}' is not a 64-char hex digest",
                self.source.sha256
            )));
        }
        for (key, bottle) in &self.bottles {
            if !is_hex_64(&bottle.sha256) {
                return Err(KegError::Configuration(format!(
                    "bottle '{key}' sha256 is not a 64-char hex digest"
                )));
            }
            if bottle.url.is_none() && self.bottle_root.is_none() {
                return Err(KegError::Configuration(format!(
                    "bottle '{key}' has no url and the formula has no bottle_root"
                )));
            }
        }
        for (idx, step) in self.build_steps.iter().enumerate() {
            if step.cmd.is_empty() || step.cmd[0].trim().is_empty() {
                return Err(KegError::Configuration(format!(
                    "build step {} has an empty command",
                    idx + 1
                )));
            }
        }
        if self.install_targets.is_empty() {
            return Err(KegError::Configuration(
                "formula declares no install targets".to_string(),
            ));
        }
        for target in &self.install_targets {
            if !is_safe_relative(&target.src) || !is_safe_relative(&target.dest) {
                return Err(KegError::Configuration(format!(
                    "install target '{} -> {}' must use relative paths without '..'",
                    target.src, target.dest
                )));
            }
        }
        if let Some(test) = &self.test {
            if test.cmd.is_empty() || test.cmd[0].trim().is_empty() {
                return Err(KegError::Configuration(
                    "test command is empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Download URL for the given bottle key, from the entry itself or
    /// derived from `bottle_root`.
    pub fn bottle_url(&self, key: &str) -> KegResult<String> {
        let bottle = self.bottles.get(key).ok_or_else(|| {
            KegError::Configuration(format!("no bottle for platform '{key}'"))
        })?;
        if let Some(url) = &bottle.url {
            return Ok(url.clone());
        }
        let root = self.bottle_root.as_deref().ok_or_else(|| {
            KegError::Configuration(format!(
                "bottle '{key}' has no url and the formula has no bottle_root"
            ))
        })?;
        Ok(format!(
            "{}/{}-{}-{}.tar.gz",
            root.trim_end_matches('/'),
            self.name,
            self.version,
            key
        ))
    }
}

fn is_safe_relative(path: &str) -> bool {
    let p = Path::new(path);
    !path.trim().is_empty()
        && p.is_relative()
        && !p.components().any(|c| matches!(c, std::path::Component::ParentDir))
}
