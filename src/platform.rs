use std::collections::BTreeMap;
use std::fmt;

use crate::error::{KegError, KegResult};
use crate::formula::Bottle;

/// The platform an install is running on, as matched against bottle keys.
///
/// Keys take the form `<os>-<version>-<arch>` (e.g. `macos-14-arm64`) or the
/// version-agnostic `<os>-<arch>` (e.g. `linux-x86_64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    /// OS version, empty when unknown. An empty version only skips the
    /// most-specific candidate tier.
    pub version: String,
    pub arch: String,
}

/// The single installation path chosen for a run: a matched bottle key, or
/// a build from source. "No bottle" is a valid state, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Bottle(String),
    Source,
}

impl Platform {
    pub fn new(os: &str, version: &str, arch: &str) -> Platform {
        Platform {
            os: os.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Detects the running platform from the host. `KEG_PLATFORM` overrides
    /// detection entirely (useful for testing resolution off-host).
    pub fn current() -> Platform {
        if let Ok(key) = std::env::var("KEG_PLATFORM") {
            if let Ok(platform) = Platform::parse(&key) {
                return platform;
            }
        }
        let os = match std::env::consts::OS {
            "macos" => "macos",
            other => other,
        };
        Platform {
            os: os.to_string(),
            version: detect_os_version(os),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Parses a bottle-style key into a platform. Two segments are
    /// `os-arch`, three are `os-version-arch`.
    pub fn parse(key: &str) -> KegResult<Platform> {
        let parts: Vec<&str> = key.split('-').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => {
                Ok(Platform::new(os, "", arch))
            }
            [os, version, arch] if !os.is_empty() && !version.is_empty() && !arch.is_empty() => {
                Ok(Platform::new(os, version, arch))
            }
            _ => Err(KegError::Configuration(format!(
                "invalid platform key '{key}' (expected os-arch or os-version-arch)"
            ))),
        }
    }

    /// Maps this platform to the best bottle in `bottles`, most specific
    /// first:
    ///
    /// 1. exact `os-version-arch`;
    /// 2. version-agnostic `os-arch`;
    /// 3. bottles keyed for another version of the same OS and architecture,
    ///    considered only when explicitly marked `any_os_version`.
    ///
    /// Tier 3 candidates carrying different checksums are ambiguous and fail
    /// loudly as a configuration error; identical checksums (one universal
    /// build published under several keys) resolve deterministically to the
    /// lexicographically first key. No match means build from source.
    pub fn resolve(&self, bottles: &BTreeMap<String, Bottle>) -> KegResult<Resolution> {
        if !self.version.is_empty() {
            let exact = format!("{}-{}-{}", self.os, self.version, self.arch);
            if bottles.contains_key(&exact) {
                return Ok(Resolution::Bottle(exact));
            }
        }
        let family = format!("{}-{}", self.os, self.arch);
        if bottles.contains_key(&family) {
            return Ok(Resolution::Bottle(family));
        }

        // BTreeMap iteration is ordered, so the first hit is already the
        // lexicographically first key.
        let compatible: Vec<(&String, &Bottle)> = bottles
            .iter()
            .filter(|(key, bottle)| bottle.any_os_version && self.same_os_arch(key))
            .collect();
        match compatible.as_slice() {
            [] => Ok(Resolution::Source),
            [(key, _)] => Ok(Resolution::Bottle((*key).clone())),
            many => {
                let first_hash = &many[0].1.sha256;
                if many.iter().all(|(_, b)| b.sha256.eq_ignore_ascii_case(first_hash)) {
                    Ok(Resolution::Bottle(many[0].0.clone()))
                } else {
                    let keys: Vec<&str> = many.iter().map(|(k, _)| k.as_str()).collect();
                    Err(KegError::Configuration(format!(
                        "ambiguous bottles for {self}: [{}] are equally specific but differ in checksum",
                        keys.join(", ")
                    )))
                }
            }
        }
    }

    /// Whether a versioned bottle key targets this OS family and architecture.
    fn same_os_arch(&self, key: &str) -> bool {
        match Platform::parse(key) {
            Ok(p) => !p.version.is_empty() && p.os == self.os && p.arch == self.arch,
            Err(_) => false,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}-{}", self.os, self.arch)
        } else {
            write!(f, "{}-{}-{}", self.os, self.version, self.arch)
        }
    }
}

/// Best-effort OS version detection: `VERSION_ID` from os-release on Linux,
/// `sw_vers` major version on macOS, empty elsewhere.
fn detect_os_version(os: &str) -> String {
    match os {
        "linux" => std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content.lines().find_map(|line| {
                    line.strip_prefix("VERSION_ID=")
                        .map(|v| v.trim_matches('"').to_string())
                })
            })
            .unwrap_or_default(),
        "macos" => std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|v| v.trim().split('.').next().unwrap_or("").to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
