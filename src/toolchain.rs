//! The build and style passes that run before any scenario.
//!
//! Both shell out to host tools found through a [`ToolLocator`] and reduce
//! to a single pass/fail with the tool's output kept for diagnostics.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::driver::{DriverError, ExitState, Invocation, RunResult};
use crate::runner_file_utils::{collect_submission_files, ToolLocator};

static FINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(.+?):(\d+):(\d+): (warning|error): (.+)$")
        .expect("finding pattern is valid")
});

const DISABLED_CHECKS: &[&str] = &[
    "misc-unused-parameters",
    "modernize-use-trailing-return-type",
    "google-build-using-namespace",
    "cppcoreguidelines-avoid-magic-numbers",
    "readability-magic-numbers",
    "fuchsia-default-arguments-calls",
    "clang-analyzer-deadcode.DeadStores",
    "bugprone-exception-escape",
    "llvm-header-guard",
    "cert-err58-cpp",
    "fuchsia-statically-constructed-objects",
    "cert-msc32-c",
    "cert-msc51-cpp",
    "google-runtime-references",
];

const NAMING_RULES: &[(&str, &str)] = &[
    ("ClassCase", "CamelCase"),
    ("ClassMemberCase", "lower_case"),
    ("ConstexprVariableCase", "CamelCase"),
    ("ConstexprVariablePrefix", "k"),
    ("EnumCase", "CamelCase"),
    ("EnumConstantCase", "CamelCase"),
    ("EnumConstantPrefix", "k"),
    ("GlobalFunctionCase", "CamelCase"),
    ("FunctionCase", "lower_case"),
    ("GlobalConstantCase", "CamelCase"),
    ("GlobalConstantPrefix", "k"),
    ("StaticConstantCase", "CamelCase"),
    ("StaticConstantPrefix", "k"),
    ("StaticVariableCase", "lower_case"),
    ("MacroDefinitionCase", "UPPER_CASE"),
    ("MacroDefinitionIgnoredRegexp", "'^[A-Z]+(_[A-Z]+)*_$'"),
    ("MemberCase", "lower_case"),
    ("PrivateMemberSuffix", "_"),
    ("PublicMemberSuffix", "''"),
    ("NamespaceCase", "lower_case"),
    ("ParameterCase", "lower_case"),
    ("TypeAliasCase", "CamelCase"),
    ("TypedefCase", "CamelCase"),
    ("VariableCase", "lower_case"),
    ("IgnoreMainLikeFunctions", "1"),
];

#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("missing {tool}; cannot {purpose}")]
    ToolUnavailable { tool: String, purpose: &'static str },
    #[error(transparent)]
    Files(#[from] anyhow::Error),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("{tool} did not finish within {limit:?}")]
    TimedOut {
        tool: String,
        limit: Duration,
        output: String,
    },
    #[error("{tool} failed with {exit}")]
    Failed {
        tool: String,
        exit: ExitState,
        output: String,
    },
    #[error("{} style problem(s) found", findings.len())]
    StyleProblems {
        findings: Vec<String>,
        output: String,
    },
}

impl ToolchainError {
    pub fn output(&self) -> Option<&str> {
        match self {
            ToolchainError::TimedOut { output, .. }
            | ToolchainError::Failed { output, .. }
            | ToolchainError::StyleProblems { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn require<L: ToolLocator>(locator: &L, purpose: &'static str) -> Result<PathBuf, ToolchainError> {
    locator.locate().ok_or_else(|| ToolchainError::ToolUnavailable {
        tool: locator.name().to_string(),
        purpose,
    })
}

fn finished(tool: &str, limit: Duration, run: RunResult) -> Result<RunResult, ToolchainError> {
    match run.exit {
        ExitState::TimedOut => Err(ToolchainError::TimedOut {
            tool: tool.to_string(),
            limit,
            output: run.output_lossy().into_owned(),
        }),
        exit if !exit.is_zero() => Err(ToolchainError::Failed {
            tool: tool.to_string(),
            exit,
            output: run.output_lossy().into_owned(),
        }),
        _ => Ok(run),
    }
}

/// Builds the submission with `make <target>` inside its directory.
pub struct Make<L> {
    locator: L,
    limit: Duration,
}

impl<L: ToolLocator> Make<L> {
    pub fn new(locator: L, limit: Duration) -> Self {
        Self { locator, limit }
    }

    pub fn build(&self, dir: &Path, target: &str) -> Result<RunResult, ToolchainError> {
        let make = require(&self.locator, "build the submission")?;
        let run = Invocation::new(make, self.limit)
            .arg(target)
            .current_dir(dir)
            .run()?;
        finished(self.locator.name(), self.limit, run)
    }
}

/// Runs the static analyser over the submission's files with the course's
/// naming conventions.
pub struct Lint<L> {
    locator: L,
    limit: Duration,
}

impl<L: ToolLocator> Lint<L> {
    pub fn new(locator: L, limit: Duration) -> Self {
        Self { locator, limit }
    }

    /// Passes only when the analyser exits cleanly and reports nothing.
    pub fn check(&self, dir: &Path, files: &[&str]) -> Result<RunResult, ToolchainError> {
        let files = collect_submission_files(dir, files)?;
        let tidy = require(&self.locator, "check coding style")?;

        let (headers, sources): (Vec<_>, Vec<_>) = files
            .iter()
            .partition(|path| path.extension().is_some_and(|ext| ext == "h"));

        let run = Invocation::new(tidy, self.limit)
            .args(sources)
            .arg(format!("-checks={}", checks_option()))
            .arg(format!("-config={}", config_option()))
            .arg(format!("-header-filter={}", header_filter(&headers)))
            .args(["--", "-std=c++17"])
            .current_dir(dir)
            .run()?;

        let tool = self.locator.name();
        if run.timed_out() {
            return finished(tool, self.limit, run);
        }
        let text = run.output_lossy().into_owned();
        let findings = findings(&text);
        if !findings.is_empty() {
            return Err(ToolchainError::StyleProblems {
                findings,
                output: text,
            });
        }
        finished(tool, self.limit, run)
    }
}

fn checks_option() -> String {
    std::iter::once("*".to_string())
        .chain(DISABLED_CHECKS.iter().map(|check| format!("-{check}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn config_option() -> String {
    let options: Vec<_> = NAMING_RULES
        .iter()
        .map(|(key, value)| {
            format!("{{key: readability-identifier-naming.{key}, value: {value}}}")
        })
        .collect();
    format!("{{CheckOptions: [{}]}}", options.join(", "))
}

fn header_filter(headers: &[&PathBuf]) -> String {
    let names: Vec<_> = headers
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| regex::escape(&name.to_string_lossy()))
        .collect();
    if names.is_empty() {
        // Matches no path, so only the sources themselves are checked.
        return "^$".to_string();
    }
    format!("({})$", names.join("|"))
}

fn findings(output: &str) -> Vec<String> {
    FINDING
        .find_iter(output)
        .map(|found| found.as_str().to_string())
        .collect()
}
