use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use tar::Archive;
use tempfile::TempDir;

use crate::error::{KegError, KegResult};
use crate::formula::BuildStep;

/// Lines of combined step output kept for diagnostics.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// An isolated, single-run build environment: a private root directory plus
/// scoped environment overrides redirecting toolchain caches and module paths
/// inside it, so build steps cannot read or write shared global state.
///
/// The root is destroyed on drop unless constructed with `keep` for
/// debugging a failed build.
pub struct BuildEnvironment {
    root: PathBuf,
    env: Vec<(String, String)>,
    // None when the caller asked to keep the root after the run.
    temp: Option<TempDir>,
}

impl BuildEnvironment {
    pub fn new(keep: bool) -> KegResult<BuildEnvironment> {
        let temp = tempfile::Builder::new()
            .prefix("keg-build-")
            .tempdir()
            .map_err(|e| KegError::Sandbox(format!("creating build root: {e}")))?;
        let root = temp.path().to_path_buf();
        for sub in ["src", "home", "cache", "tmp"] {
            std::fs::create_dir_all(root.join(sub))
                .map_err(|e| KegError::Sandbox(format!("creating build root: {e}")))?;
        }
        let env = vec![
            ("HOME".to_string(), path_str(&root.join("home"))),
            ("TMPDIR".to_string(), path_str(&root.join("tmp"))),
            ("XDG_CACHE_HOME".to_string(), path_str(&root.join("cache"))),
            ("GOPATH".to_string(), path_str(&root.join("cache").join("go"))),
            ("CARGO_HOME".to_string(), path_str(&root.join("cache").join("cargo"))),
        ];
        let temp = if keep {
            let kept = temp.keep();
            debug_assert_eq!(kept, root);
            None
        } else {
            Some(temp)
        };
        Ok(BuildEnvironment { root, env, temp })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where archives are unpacked before building.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn overrides(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn is_kept(&self) -> bool {
        self.temp.is_none()
    }
}

/// Unpacks a gzip-compressed tarball into `dest`.
pub fn unpack_archive<P: AsRef<Path>, Q: AsRef<Path>>(archive: P, dest: Q) -> KegResult<()> {
    let file = std::fs::File::open(&archive)
        .map_err(|e| KegError::Sandbox(format!("opening '{}': {e}", archive.as_ref().display())))?;
    let mut tarball = Archive::new(GzDecoder::new(file));
    tarball
        .unpack(&dest)
        .map_err(|e| KegError::Sandbox(format!("unpacking '{}': {e}", archive.as_ref().display())))?;
    Ok(())
}

/// Release tarballs usually wrap everything in a single `name-version/`
/// directory. Descends one level when the unpack root contains exactly one
/// entry and it is a directory; otherwise returns the root unchanged.
pub fn locate_source_root<P: AsRef<Path>>(dir: P) -> KegResult<PathBuf> {
    let dir = dir.as_ref();
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| KegError::Sandbox(format!("reading '{}': {e}", dir.display())))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}

/// Executes the formula's build steps in order inside the sandbox.
///
/// Steps are synchronous and sequential; each may depend on the filesystem
/// left by the previous one. The first failing step aborts the rest and
/// reports its index, exit status and an output tail. Build failures are
/// deterministic and never retried.
///
/// Returns the tree that the installer copies targets from.
pub fn run_steps(env: &BuildEnvironment, steps: &[BuildStep]) -> KegResult<PathBuf> {
    let work = locate_source_root(env.source_dir())?;
    for (idx, step) in steps.iter().enumerate() {
        let step_no = idx + 1;
        let (program, args) = step
            .cmd
            .split_first()
            .ok_or_else(|| KegError::Configuration(format!("build step {step_no} is empty")))?;
        let rendered = step.cmd.join(" ");
        let output = Command::new(program)
            .args(args)
            .current_dir(&work)
            .envs(env.overrides().iter().cloned())
            .output()
            .map_err(|e| KegError::Build {
                step: step_no,
                cmd: rendered.clone(),
                status: format!("failed to start: {e}"),
                tail: vec![],
            })?;
        if !output.status.success() {
            return Err(KegError::Build {
                step: step_no,
                cmd: rendered,
                status: output.status.to_string(),
                tail: output_tail(&output.stdout, &output.stderr),
            });
        }
    }
    Ok(work)
}

/// Last [`OUTPUT_TAIL_LINES`] lines of the combined stdout and stderr.
pub fn output_tail(stdout: &[u8], stderr: &[u8]) -> Vec<String> {
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    );
    let lines: Vec<String> = combined
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].to_vec()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
