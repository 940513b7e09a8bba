use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checksum;
use crate::error::{KegError, KegResult};

/// How many times a download is attempted before the fetch becomes fatal.
pub const MAX_FETCH_RETRIES: u32 = 3;
/// Backoff before the second attempt; doubled on each further attempt.
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// A staged artifact: a local path plus its size on disk.
#[derive(Debug, Clone)]
pub struct Staged {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Retrieves source tarballs and bottles into a local staging directory.
///
/// Staged files are keyed by their expected checksum, so an already verified
/// artifact is reused across runs and never overwritten by a re-fetch.
pub struct Fetcher {
    staging: PathBuf,
}

impl Fetcher {
    pub fn new<P: Into<PathBuf>>(staging: P) -> Fetcher {
        Fetcher {
            staging: staging.into(),
        }
    }

    /// The default per-user staging directory.
    pub fn default_staging() -> KegResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "keg", "keg").ok_or_else(|| {
            KegError::Fetch {
                url: String::new(),
                reason: "could not determine a cache directory".to_string(),
            }
        })?;
        Ok(dirs.cache_dir().join("staging"))
    }

    /// Stages the artifact at `url`, reusing a cached copy when its content
    /// already matches `expected_sha`. Local paths and `file://` URLs are
    /// copied; anything else is downloaded with bounded retries.
    ///
    /// Staging storage failures surface as [`KegError::Fetch`], like the
    /// transfer failures they interleave with.
    pub fn fetch(&self, url: &str, expected_sha: &str) -> KegResult<Staged> {
        std::fs::create_dir_all(&self.staging)
            .map_err(|e| storage_error(url, &self.staging, e))?;
        let staged_path = self.staged_path(url, expected_sha);

        if staged_path.exists() {
            if let Ok(actual) = checksum::hash_file(&staged_path) {
                if actual.eq_ignore_ascii_case(expected_sha) {
                    let bytes = std::fs::metadata(&staged_path)
                        .map_err(|e| storage_error(url, &staged_path, e))?
                        .len();
                    return Ok(Staged {
                        path: staged_path,
                        bytes,
                    });
                }
            }
            // Stale or corrupt staging entry: replace it below.
        }

        let tmp = self.staging.join(format!(
            ".download-{}-{}",
            std::process::id(),
            file_name_of(url)
        ));
        match local_path(url) {
            Some(source) => {
                std::fs::copy(&source, &tmp).map_err(|e| {
                    let _ = std::fs::remove_file(&tmp);
                    KegError::Fetch {
                        url: url.to_string(),
                        reason: format!("copying '{}': {e}", source.display()),
                    }
                })?;
            }
            None => self.download_with_retries(url, &tmp)?,
        }
        std::fs::rename(&tmp, &staged_path)
            .map_err(|e| storage_error(url, &staged_path, e))?;
        let bytes = std::fs::metadata(&staged_path)
            .map_err(|e| storage_error(url, &staged_path, e))?
            .len();
        Ok(Staged {
            path: staged_path,
            bytes,
        })
    }

    fn staged_path(&self, url: &str, expected_sha: &str) -> PathBuf {
        let short = &expected_sha[..expected_sha.len().min(12)];
        self.staging
            .join(format!("{}-{}", short.to_lowercase(), file_name_of(url)))
    }

    fn download_with_retries(&self, url: &str, dest: &Path) -> KegResult<()> {
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut last_reason = String::new();
        for attempt in 1..=MAX_FETCH_RETRIES {
            if attempt > 1 {
                std::thread::sleep(delay);
                delay *= 2;
            }
            match download_once(url, dest) {
                Ok(()) => return Ok(()),
                Err(reason) => last_reason = reason,
            }
        }
        // Do not leave a partial download behind once the fetch is fatal.
        let _ = std::fs::remove_file(dest);
        Err(KegError::Fetch {
            url: url.to_string(),
            reason: format!("{last_reason} (after {MAX_FETCH_RETRIES} attempts)"),
        })
    }
}

fn storage_error(url: &str, path: &Path, e: std::io::Error) -> KegError {
    KegError::Fetch {
        url: url.to_string(),
        reason: format!("staging '{}': {e}", path.display()),
    }
}

fn download_once(url: &str, dest: &Path) -> Result<(), String> {
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?;
    let mut file = std::fs::File::create(dest).map_err(|e| e.to_string())?;
    let mut reader = response;
    std::io::copy(&mut reader, &mut file).map_err(|e| e.to_string())?;
    Ok(())
}

/// Treats `file://` URLs and bare paths as local sources.
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(stripped) = url.strip_prefix("file://") {
        return Some(PathBuf::from(stripped));
    }
    if !url.contains("://") {
        return Some(PathBuf::from(url));
    }
    None
}

fn file_name_of(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("artifact")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_copies_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("pkg.tar.gz");
        std::fs::write(&source, b"archive bytes").unwrap();
        let sha = checksum::hash_file(&source).unwrap();

        let fetcher = Fetcher::new(dir.path().join("staging"));
        let staged = fetcher.fetch(source.to_str().unwrap(), &sha).unwrap();
        assert!(staged.path.exists());
        assert_eq!(staged.bytes, 13);
        checksum::verify(&staged.path, &sha).unwrap();
    }

    #[test]
    fn test_fetch_reuses_verified_staging_entry() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("pkg.tar.gz");
        std::fs::write(&source, b"original").unwrap();
        let sha = checksum::hash_file(&source).unwrap();

        let fetcher = Fetcher::new(dir.path().join("staging"));
        let first = fetcher.fetch(source.to_str().unwrap(), &sha).unwrap();

        // Mutating the origin must not disturb the verified staged copy.
        std::fs::write(&source, b"tampered").unwrap();
        let second = fetcher.fetch(source.to_str().unwrap(), &sha).unwrap();
        assert_eq!(first.path, second.path);
        checksum::verify(&second.path, &sha).unwrap();
    }

    #[test]
    fn test_fetch_replaces_stale_staging_entry() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("pkg.tar.gz");
        std::fs::write(&source, b"fresh content").unwrap();
        let sha = checksum::hash_file(&source).unwrap();

        let staging = dir.path().join("staging");
        let fetcher = Fetcher::new(&staging);
        // Pre-seed a corrupt entry under the same staging name.
        std::fs::create_dir_all(&staging).unwrap();
        let entry = staging.join(format!("{}-pkg.tar.gz", &sha[..12]));
        std::fs::write(&entry, b"garbage").unwrap();

        let staged = fetcher.fetch(source.to_str().unwrap(), &sha).unwrap();
        checksum::verify(&staged.path, &sha).unwrap();
    }

    #[test]
    fn test_storage_failure_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("pkg.tar.gz");
        std::fs::write(&source, b"archive bytes").unwrap();
        let sha = checksum::hash_file(&source).unwrap();

        // A regular file where the staging directory should be.
        let staging = dir.path().join("staging");
        std::fs::write(&staging, b"in the way").unwrap();

        let err = Fetcher::new(&staging)
            .fetch(source.to_str().unwrap(), &sha)
            .unwrap_err();
        assert!(matches!(err, KegError::Fetch { .. }));
        assert_eq!(err.exit_code(), 11);
    }

    #[test]
    fn test_unreachable_url_fails_after_bounded_retries() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let fetcher = Fetcher::new(&staging);

        // Port 1 refuses connections, so every attempt fails fast.
        let err = fetcher
            .fetch("http://127.0.0.1:1/pkg.tar.gz", &"c".repeat(64))
            .unwrap_err();
        match err {
            KegError::Fetch { ref reason, .. } => {
                assert!(reason.contains(&format!("{MAX_FETCH_RETRIES} attempts")));
            }
            ref other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 11);

        // No partial download left behind.
        let leftovers: Vec<_> = std::fs::read_dir(&staging)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "staging not clean: {leftovers:?}");
    }

    #[test]
    fn test_fetch_missing_local_file_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(dir.path().join("staging"));
        let err = fetcher
            .fetch("/nonexistent/pkg.tar.gz", &"a".repeat(64))
            .unwrap_err();
        assert!(matches!(err, KegError::Fetch { .. }));
    }

    #[test]
    fn test_file_url_is_local() {
        assert_eq!(
            local_path("file:///tmp/a.tar.gz"),
            Some(PathBuf::from("/tmp/a.tar.gz"))
        );
        assert_eq!(local_path("/tmp/a.tar.gz"), Some(PathBuf::from("/tmp/a.tar.gz")));
        assert_eq!(local_path("https://example.com/a.tar.gz"), None);
    }
}
