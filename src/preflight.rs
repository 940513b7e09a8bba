use crate::error::{KegError, KegResult};

/// Checks whether an executable can be located on the current PATH.
pub fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Asserts that every declared build dependency is already present.
///
/// Dependencies are preconditions satisfied by an external resolver before
/// this pipeline runs; nothing is installed here. The first missing one
/// fails fast, before any fetch or filesystem mutation.
pub fn ensure_build_dependencies(deps: &[String]) -> KegResult<()> {
    for dep in deps {
        if !command_exists(dep) {
            return Err(KegError::MissingDependency { name: dep.clone() });
        }
    }
    Ok(())
}
