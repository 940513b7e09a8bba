use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{KegError, KegResult};
use crate::formula::Formula;

/// File name of the per-formula receipt inside the prefix.
pub const RECEIPT_FILE: &str = "receipt.json";

/// Which of the two installation paths produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallKind {
    Bottle,
    Source,
}

impl fmt::Display for InstallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallKind::Bottle => write!(f, "bottle"),
            InstallKind::Source => write!(f, "source"),
        }
    }
}

/// The receipt persisted after a successful install, read back by
/// `uninstall`, `list` and `which`. Written via temp file plus atomic
/// rename, so a receipt on disk is always complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub name: String,
    pub version: String,
    pub kind: InstallKind,
    /// The checksum the installed artifact was verified against.
    pub checksum: String,
    #[serde(with = "time::serde::rfc3339")]
    pub installed_at: OffsetDateTime,
    pub prefix: PathBuf,
}

impl InstallationRecord {
    pub fn new(formula: &Formula, kind: InstallKind, checksum: &str, prefix: &Path) -> Self {
        InstallationRecord {
            name: formula.name.clone(),
            version: formula.version.clone(),
            kind,
            checksum: checksum.to_lowercase(),
            installed_at: OffsetDateTime::now_utc(),
            prefix: prefix.to_path_buf(),
        }
    }

    pub fn path_for(prefix: &Path, name: &str) -> PathBuf {
        prefix.join(name).join(RECEIPT_FILE)
    }

    /// Loads the receipt for `name`, or `None` when nothing is installed.
    pub fn load(prefix: &Path, name: &str) -> KegResult<Option<InstallationRecord>> {
        let path = Self::path_for(prefix, name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let record = serde_json::from_str(&content).map_err(|e| {
            KegError::Install(format!("corrupt receipt '{}': {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    /// Persists the receipt: serialized to a temp file in the same directory,
    /// then renamed into place as a single atomic step.
    pub fn save(&self) -> KegResult<()> {
        let path = Self::path_for(&self.prefix, &self.name);
        let parent = path
            .parent()
            .ok_or_else(|| KegError::Install("receipt path has no parent".to_string()))?;
        std::fs::create_dir_all(parent)?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| KegError::Install(format!("serializing receipt: {e}")))?;
        let tmp = parent.join(format!(".{}-{}", RECEIPT_FILE, std::process::id()));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
