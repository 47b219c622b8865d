use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::driver::{ExitState, RunResult};

/// The exit status a scenario requires of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitClass {
    Zero,
    NonZero,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("expected {expected}, but the program finished with {observed}")]
pub struct ExitCodeMismatch {
    pub expected: ExitClass,
    pub observed: ExitState,
    pub output: String,
}

impl ExitClass {
    /// A process killed by a signal counts as non-zero; one that timed out
    /// satisfies neither class.
    pub fn admits(self, exit: ExitState) -> bool {
        match (self, exit) {
            (_, ExitState::TimedOut) => false,
            (ExitClass::Zero, exit) => exit.is_zero(),
            (ExitClass::NonZero, exit) => !exit.is_zero(),
        }
    }

    pub fn validate(self, run: &RunResult) -> Result<(), ExitCodeMismatch> {
        if self.admits(run.exit) {
            return Ok(());
        }
        Err(ExitCodeMismatch {
            expected: self,
            observed: run.exit,
            output: run.output_lossy().into_owned(),
        })
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitClass::Zero => f.write_str("zero exit code"),
            ExitClass::NonZero => f.write_str("non-zero exit code"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run(exit: ExitState) -> RunResult {
        RunResult {
            output: b"some output\n".to_vec(),
            truncated: false,
            exit,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn zero_requires_clean_exit() {
        assert!(ExitClass::Zero.validate(&run(ExitState::Exited(0))).is_ok());
        for exit in [
            ExitState::Exited(1),
            ExitState::Exited(-1),
            ExitState::Signaled(11),
            ExitState::TimedOut,
        ] {
            assert!(ExitClass::Zero.validate(&run(exit)).is_err(), "{exit:?}");
        }
    }

    #[test]
    fn non_zero_rejects_clean_exit() {
        assert!(ExitClass::NonZero.validate(&run(ExitState::Exited(0))).is_err());
        assert!(ExitClass::NonZero.validate(&run(ExitState::Exited(1))).is_ok());
        assert!(ExitClass::NonZero.validate(&run(ExitState::Exited(255))).is_ok());
        assert!(ExitClass::NonZero.validate(&run(ExitState::Signaled(6))).is_ok());
    }

    #[test]
    fn timeout_satisfies_neither_class() {
        assert!(!ExitClass::Zero.admits(ExitState::TimedOut));
        assert!(!ExitClass::NonZero.admits(ExitState::TimedOut));
    }

    #[test]
    fn mismatch_names_both_sides_and_keeps_output() {
        let mismatch = ExitClass::NonZero
            .validate(&run(ExitState::Exited(0)))
            .unwrap_err();
        assert_eq!(
            mismatch.to_string(),
            "expected non-zero exit code, but the program finished with exit code 0"
        );
        assert_eq!(mismatch.output, "some output\n");
    }
}
