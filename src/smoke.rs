use std::path::Path;
use std::process::Command;

use crate::formula::TestCommand;
use crate::sandbox::output_tail;

/// Outcome of the post-install smoke test.
///
/// A failure never rolls the install back; it downgrades the terminal state
/// to "installed, unverified by test" so the caller can decide to keep or
/// uninstall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed { status: String, tail: Vec<String> },
}

impl TestStatus {
    pub fn passed(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

/// Runs the formula's smoke test against the installed artifact. `{prefix}`
/// in arguments expands to the formula's current directory, which is also
/// the working directory. The installed state is never altered.
pub fn run(test: &TestCommand, current: &Path) -> TestStatus {
    let prefix = current.to_string_lossy();
    let rendered: Vec<String> = test
        .cmd
        .iter()
        .map(|arg| arg.replace("{prefix}", &prefix))
        .collect();
    let Some((program, args)) = rendered.split_first() else {
        return TestStatus::Failed {
            status: "empty test command".to_string(),
            tail: vec![],
        };
    };
    match Command::new(program).args(args).current_dir(current).output() {
        Ok(output) if output.status.success() => TestStatus::Passed,
        Ok(output) => TestStatus::Failed {
            status: output.status.to_string(),
            tail: output_tail(&output.stdout, &output.stderr),
        },
        Err(e) => TestStatus::Failed {
            status: format!("failed to start: {e}"),
            tail: vec![],
        },
    }
}
