use std::path::PathBuf;
use thiserror::Error;

/// Exit code reported when the install succeeded but the smoke test failed.
pub const EXIT_DEGRADED: i32 = 2;

pub type KegResult<T> = Result<T, KegError>;

/// Every failure kind the install pipeline can produce.
///
/// Each variant maps to a distinct process exit code so wrapping tooling can
/// tell "nothing installed" apart from the specific stage that failed.
#[derive(Debug, Error)]
pub enum KegError {
    /// Malformed or ambiguous formula. Fatal, raised before any filesystem mutation.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Download or staging failure. Retried with backoff before becoming fatal.
    #[error("fetch failed for '{url}': {reason}")]
    Fetch { url: String, reason: String },
    /// Staged content does not match the formula's expected hash. Always fatal,
    /// never retried automatically.
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    /// A declared build dependency could not be located on the system.
    #[error("missing build dependency: '{name}' not found on PATH")]
    MissingDependency { name: String },
    /// Sandbox construction or archive unpacking failed.
    #[error("sandbox error: {0}")]
    Sandbox(String),
    /// A build step exited non-zero. Carries the 1-based step index and a
    /// bounded tail of the captured output.
    #[error("build step {step} failed ({cmd}): {status}")]
    Build {
        step: usize,
        cmd: String,
        status: String,
        tail: Vec<String>,
    },
    /// Copying into the prefix or flipping the current pointer failed. The
    /// previously installed version, if any, is still the active one.
    #[error("install failed: {0}")]
    Install(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KegError {
    /// Distinct exit code per failure kind (0 and [`EXIT_DEGRADED`] are
    /// reserved for success and degraded installs).
    pub fn exit_code(&self) -> i32 {
        match self {
            KegError::Configuration(_) => 10,
            KegError::Fetch { .. } => 11,
            KegError::ChecksumMismatch { .. } => 12,
            KegError::MissingDependency { .. } => 13,
            KegError::Build { .. } => 14,
            KegError::Install(_) => 15,
            KegError::Sandbox(_) => 16,
            KegError::Io(_) => 1,
        }
    }

    /// Captured diagnostic output, if this error kind carries any.
    pub fn tail(&self) -> &[String] {
        match self {
            KegError::Build { tail, .. } => tail,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            KegError::Configuration("bad".to_string()),
            KegError::Fetch {
                url: "u".to_string(),
                reason: "r".to_string(),
            },
            KegError::ChecksumMismatch {
                path: PathBuf::from("f"),
                expected: "a".to_string(),
                actual: "b".to_string(),
            },
            KegError::MissingDependency {
                name: "go".to_string(),
            },
            KegError::Build {
                step: 1,
                cmd: "make".to_string(),
                status: "exit status: 1".to_string(),
                tail: vec![],
            },
            KegError::Install("oops".to_string()),
            KegError::Sandbox("no tempdir".to_string()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&EXIT_DEGRADED));
    }

    #[test]
    fn test_sandbox_and_build_codes_differ() {
        let sandbox = KegError::Sandbox("no tempdir".to_string());
        let build = KegError::Build {
            step: 2,
            cmd: "go build".to_string(),
            status: "exit status: 1".to_string(),
            tail: vec!["boom".to_string()],
        };
        assert_ne!(sandbox.exit_code(), build.exit_code());
        assert_eq!(sandbox.exit_code(), 16);
    }
}
