use std::fmt;
use std::path::PathBuf;

use colored::Colorize;
use thiserror::Error;

use crate::checksum;
use crate::error::{EXIT_DEGRADED, KegError, KegResult};
use crate::fetch::Fetcher;
use crate::formula::Formula;
use crate::install;
use crate::platform::{Platform, Resolution};
use crate::preflight;
use crate::record::{InstallKind, InstallationRecord};
use crate::sandbox::{self, BuildEnvironment};
use crate::smoke::{self, TestStatus};

/// Pipeline stages, entered strictly in order and never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Fetching,
    Verifying,
    Building,
    Installing,
    Testing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolving => "resolving",
            Stage::Fetching => "fetching",
            Stage::Verifying => "verifying",
            Stage::Building => "building",
            Stage::Installing => "installing",
            Stage::Testing => "testing",
            Stage::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// A pipeline failure: the underlying error tagged with the stage that was
/// active when it happened. Lower-level errors are never reinterpreted.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub error: KegError,
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// Knobs for a single run.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root installation directory (the cellar).
    pub prefix: PathBuf,
    /// Where fetched artifacts are staged and cached.
    pub staging: PathBuf,
    /// Retain the build sandbox after the run for debugging.
    pub keep_sandbox: bool,
    /// Suppress stage progress output.
    pub quiet: bool,
}

/// The terminal state of a successful pipeline: the install happened, and
/// the smoke test either passed or left the install degraded.
#[derive(Debug)]
pub struct InstallOutcome {
    pub record: InstallationRecord,
    pub test: TestStatus,
}

impl InstallOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.test.passed() { 0 } else { EXIT_DEGRADED }
    }
}

/// Sequences a single formula through
/// resolve -> fetch -> verify -> (build) -> install -> test.
///
/// The machine is strictly forward: verification always precedes any step
/// that touches the filesystem outside staging, builds happen only when no
/// bottle matched, and a smoke-test failure still terminates in `Done` with
/// a degraded flag rather than `Failed`.
pub struct Orchestrator {
    formula: Formula,
    platform: Platform,
    options: Options,
}

impl Orchestrator {
    /// Validates the formula up front; a malformed one never reaches the
    /// pipeline, so no filesystem mutation is attempted for it.
    pub fn new(formula: Formula, platform: Platform, options: Options) -> KegResult<Orchestrator> {
        formula.validate()?;
        Ok(Orchestrator {
            formula,
            platform,
            options,
        })
    }

    pub fn run(&self) -> Result<InstallOutcome, PipelineError> {
        // Resolving
        self.announce(Stage::Resolving, &format!("platform {}", self.platform));
        let resolution = self
            .platform
            .resolve(&self.formula.bottles)
            .map_err(|e| self.fail(Stage::Resolving, e))?;
        let (url, expected, kind) = match &resolution {
            Resolution::Bottle(key) => {
                self.announce(Stage::Resolving, &format!("bottle '{key}' matched"));
                let url = self
                    .formula
                    .bottle_url(key)
                    .map_err(|e| self.fail(Stage::Resolving, e))?;
                let sha = self.formula.bottles[key].sha256.clone();
                (url, sha, InstallKind::Bottle)
            }
            Resolution::Source => {
                self.announce(Stage::Resolving, "no bottle available, will build from source");
                preflight::ensure_build_dependencies(&self.formula.build_dependencies)
                    .map_err(|e| self.fail(Stage::Resolving, e))?;
                (
                    self.formula.source.url.clone(),
                    self.formula.source.sha256.clone(),
                    InstallKind::Source,
                )
            }
        };

        // Fetching
        self.announce(Stage::Fetching, &url);
        let fetcher = Fetcher::new(&self.options.staging);
        let staged = fetcher
            .fetch(&url, &expected)
            .map_err(|e| self.fail(Stage::Fetching, e))?;
        self.announce(Stage::Fetching, &format!("{} bytes staged", staged.bytes));

        // Verifying: the gate every byte passes before build or install.
        self.announce(Stage::Verifying, &format!("sha256 {expected}"));
        checksum::verify(&staged.path, &expected)
            .map_err(|e| self.fail(Stage::Verifying, e))?;

        // The sandbox holds the unpacked tree for both paths; build steps
        // run in it only on the source path.
        let unpack_stage = match kind {
            InstallKind::Source => Stage::Building,
            InstallKind::Bottle => Stage::Installing,
        };
        let env = BuildEnvironment::new(self.options.keep_sandbox)
            .map_err(|e| self.fail(unpack_stage, e))?;
        sandbox::unpack_archive(&staged.path, env.source_dir())
            .map_err(|e| self.fail(unpack_stage, e))?;
        let tree = match kind {
            InstallKind::Source => {
                self.announce(
                    Stage::Building,
                    &format!("{} steps in {}", self.formula.build_steps.len(), env.root().display()),
                );
                sandbox::run_steps(&env, &self.formula.build_steps)
                    .map_err(|e| self.fail(Stage::Building, e))?
            }
            InstallKind::Bottle => sandbox::locate_source_root(env.source_dir())
                .map_err(|e| self.fail(Stage::Installing, e))?,
        };

        // Installing
        self.announce(Stage::Installing, &self.options.prefix.display().to_string());
        let record = install::install(
            &self.options.prefix,
            &self.formula,
            kind,
            &expected,
            &tree,
        )
        .map_err(|e| self.fail(Stage::Installing, e))?;
        if env.is_kept() {
            self.announce(Stage::Installing, &format!("sandbox kept at {}", env.root().display()));
        }

        // Testing: failure is reported, never rolled back.
        let test = match &self.formula.test {
            Some(test) => {
                self.announce(Stage::Testing, &test.cmd.join(" "));
                match install::current_dir(&self.options.prefix, &self.formula.name) {
                    Some(current) => smoke::run(test, &current),
                    None => TestStatus::Failed {
                        status: "current pointer missing after install".to_string(),
                        tail: vec![],
                    },
                }
            }
            None => TestStatus::Passed,
        };

        self.announce(Stage::Done, &format!("{} {} ({kind})", record.name, record.version));
        Ok(InstallOutcome { record, test })
    }

    fn fail(&self, stage: Stage, error: KegError) -> PipelineError {
        PipelineError { stage, error }
    }

    fn announce(&self, stage: Stage, detail: &str) {
        if !self.options.quiet {
            println!("{} {stage}: {detail}", "==>".blue().bold());
        }
    }
}
