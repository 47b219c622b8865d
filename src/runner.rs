use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::{Cli, Limits};
use crate::driver::{DriverError, ExitState, Invocation};
use crate::exit_code::ExitCodeMismatch;
use crate::expect::ExpectationMiss;
use crate::image_compare::{CompareError, ImageComparator, ImageComparison};
use crate::runner_file_utils::{HostTool, ToolLocator};
use crate::scenario::{self, Part, Scenario, ScenarioKind};
use crate::toolchain::{Lint, Make, ToolchainError};

/// Why a single scenario failed. None of these stop the battery.
#[derive(Error, Debug)]
pub enum ScenarioFailure {
    #[error(transparent)]
    Spawn(DriverError),
    #[error("no end of output within {limit:?} while waiting for {waiting_for}")]
    TimeoutExceeded {
        limit: Duration,
        waiting_for: String,
        output: String,
    },
    #[error("could not clear old output {}: {source}", path.display())]
    StaleArtifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{miss}; the program finished with {observed}")]
    ExpectationNotMet {
        miss: ExpectationMiss,
        observed: ExitState,
    },
    #[error(transparent)]
    ExitCodeMismatch(#[from] ExitCodeMismatch),
    #[error(transparent)]
    Comparison(#[from] CompareError),
    #[error("output image has too much error ({:.2}% > {:.2}%)", comparison.total.percent(), comparison.max_error * 100.0)]
    TooMuchError { comparison: ImageComparison },
}

impl ScenarioFailure {
    /// What the program printed, when it got far enough to print anything.
    pub fn output(&self) -> Option<&str> {
        match self {
            ScenarioFailure::TimeoutExceeded { output, .. } => Some(output),
            ScenarioFailure::ExpectationNotMet { miss, .. } => Some(&miss.output),
            ScenarioFailure::ExitCodeMismatch(mismatch) => Some(&mismatch.output),
            _ => None,
        }
    }
}

/// Result of one scenario, numbered from 1 across the whole battery.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub number: usize,
    pub result: std::result::Result<Option<ImageComparison>, ScenarioFailure>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Drives the program under test through scenarios, one process at a time.
pub struct ScenarioRunner<L> {
    program: PathBuf,
    work_dir: PathBuf,
    limits: Limits,
    comparator: ImageComparator<L>,
}

impl<L: ToolLocator> ScenarioRunner<L> {
    pub fn new(program: PathBuf, work_dir: PathBuf, limits: Limits, comparator: ImageComparator<L>) -> Self {
        Self {
            program,
            work_dir,
            limits,
            comparator,
        }
    }

    fn limit_for(&self, kind: ScenarioKind) -> Duration {
        match kind {
            ScenarioKind::ArgumentError => self.limits.error_run,
            ScenarioKind::Success => self.limits.success_run,
        }
    }

    /// Runs one scenario: spawn, expected text, exit status, then the image
    /// comparison if the scenario has one.
    pub fn evaluate(
        &self,
        scenario: &Scenario,
    ) -> std::result::Result<Option<ImageComparison>, ScenarioFailure> {
        if let Some(image) = scenario.image() {
            self.clear_output(&image.produced)?;
        }

        let limit = self.limit_for(scenario.kind());
        let invocation = Invocation::new(&self.program, limit)
            .args(scenario.args())
            .current_dir(&self.work_dir);
        debug!("Running {:?} with {:?}", invocation.program(), scenario.args());
        let run = invocation.run().map_err(ScenarioFailure::Spawn)?;

        if run.timed_out() {
            return Err(ScenarioFailure::TimeoutExceeded {
                limit,
                waiting_for: scenario
                    .expected_output()
                    .map(|phrase| format!("\"{}\"", phrase.phrase()))
                    .unwrap_or_else(|| "the program to finish".to_string()),
                output: run.output_lossy().into_owned(),
            });
        }
        if let Some(phrase) = scenario.expected_output() {
            phrase
                .check(&run.output)
                .map_err(|miss| ScenarioFailure::ExpectationNotMet {
                    miss,
                    observed: run.exit,
                })?;
        }
        scenario.exit().validate(&run)?;

        let Some(image) = scenario.image() else {
            return Ok(None);
        };
        let comparison = self.comparator.compare(&image.expected, &image.produced)?;
        if !comparison.passed() {
            return Err(ScenarioFailure::TooMuchError { comparison });
        }
        Ok(Some(comparison))
    }

    /// An image left by an earlier run must not stand in for this one.
    fn clear_output(&self, produced: &Path) -> std::result::Result<(), ScenarioFailure> {
        let path = self.work_dir.join(produced);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed old output {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ScenarioFailure::StaleArtifact { path, source }),
        }
    }

    /// Runs every scenario in order, logging each result as it lands. A
    /// failure never skips the scenarios after it.
    pub fn run_battery(&self, scenarios: &[Scenario]) -> Vec<ScenarioOutcome> {
        scenarios
            .iter()
            .enumerate()
            .map(|(index, scenario)| {
                let number = index + 1;
                info!("Test {number} - {scenario}");
                let outcome = ScenarioOutcome {
                    number,
                    result: self.evaluate(scenario),
                };
                report_outcome(&outcome, scenario);
                outcome
            })
            .collect()
    }
}

fn report_comparison(comparison: &ImageComparison, image: Option<&scenario::ImageCheck>) {
    if let Some(image) = image {
        info!(
            "Analyzed difference between \"{}\" and \"{}\"",
            image.produced.display(),
            image.expected.display()
        );
    }
    for (channel, error, within) in comparison.channels() {
        let mark = if within { "✅" } else { "❌" };
        info!("{mark} {channel}: {:.2}% error", error.percent());
    }
}

fn report_outcome(outcome: &ScenarioOutcome, scenario: &Scenario) {
    let number = outcome.number;
    match &outcome.result {
        Ok(comparison) => {
            if let Some(comparison) = comparison {
                report_comparison(comparison, scenario.image());
            }
            println!("{}", format!("Test {number} passed").green());
        }
        Err(failure) => {
            match failure {
                ScenarioFailure::ExpectationNotMet { miss, observed } => {
                    error!("Expected: \"{}\"", miss.expected);
                    error!("Could not find expected output.");
                    error!("Exit status was {observed}.");
                }
                ScenarioFailure::ExitCodeMismatch(mismatch) => {
                    error!("Expected: {}.", mismatch.expected);
                    error!("Exit status was {}.", mismatch.observed);
                }
                ScenarioFailure::TooMuchError { comparison } => {
                    report_comparison(comparison, scenario.image());
                    error!("❌ {failure}");
                }
                ScenarioFailure::Comparison(CompareError::ToolUnavailable { .. }) => {
                    error!("❌ {failure}");
                    error!("Please install GraphicsMagick before grading image output.");
                }
                ScenarioFailure::Comparison(CompareError::ParseFailure { report })
                | ScenarioFailure::Comparison(CompareError::TimedOut { report, .. }) => {
                    error!("❌ {failure}");
                    error!("Comparison report: \"{report}\"");
                }
                ScenarioFailure::Comparison(_) => error!("❌ {failure}"),
                ScenarioFailure::Spawn(_)
                | ScenarioFailure::StaleArtifact { .. }
                | ScenarioFailure::TimeoutExceeded { .. } => {
                    error!("{failure}")
                }
            }
            if let Some(output) = failure.output() {
                error!("Your output: \"{output}\"");
            }
            error!("Did not receive expected response for test {number}.");
            let line = format!("Test {number} failed: {failure}");
            if matches!(failure, ScenarioFailure::TimeoutExceeded { .. }) {
                println!("{}", line.yellow());
            } else {
                println!("{}", line.red());
            }
        }
    }
}

/// Everything a grading session decided, in the order it was decided.
#[derive(Debug, Serialize)]
pub struct GradeReport {
    pub part: Part,
    pub build: bool,
    /// `None` when the style pass was skipped.
    pub lint: Option<bool>,
    pub scenarios: Vec<bool>,
    /// Build, style pass (when run) and every scenario all passed.
    pub passed: bool,
}

impl GradeReport {
    pub fn new(part: Part, build: bool, lint: Option<bool>, scenarios: Vec<bool>) -> Self {
        let passed = build && lint.unwrap_or(true) && scenarios.iter().all(|ok| *ok);
        Self {
            part,
            build,
            lint,
            scenarios,
            passed,
        }
    }

    pub fn to_score(&self) -> String {
        let passed = self.scenarios.iter().filter(|ok| **ok).count();
        format!("{passed}/{}", self.scenarios.len())
    }
}

fn report_toolchain_failure(step: &str, err: &ToolchainError) {
    error!("{step} failed: {err}");
    if let ToolchainError::StyleProblems { findings, .. } = err {
        for finding in findings {
            error!("  {finding}");
        }
    } else if let Some(output) = err.output() {
        error!("Output: \"{output}\"");
    }
}

/// Builds the submission, checks its style and runs the part's scenario
/// battery against the result.
pub fn make_and_run(config: &Cli) -> Result<GradeReport> {
    let work_dir = fs::canonicalize(&config.target_directory).with_context(|| {
        format!(
            "Target directory {} is not accessible",
            config.target_directory.display()
        )
    })?;
    let limits = config.limits();
    let scenarios = scenario::battery(config.part).context("Failed to build scenario table")?;

    println!("Grading {} in {}", config.part, work_dir.display());

    let build = if config.nomake {
        true
    } else {
        match Make::new(HostTool::new("make"), limits.make).build(&work_dir, &config.program_name) {
            Ok(_) => true,
            Err(e) => {
                report_toolchain_failure("Build", &e);
                false
            }
        }
    };

    let lint = if config.no_lint {
        None
    } else {
        let lint = Lint::new(HostTool::new(&config.tidy), limits.lint);
        Some(match lint.check(&work_dir, config.part.source_files()) {
            Ok(_) => {
                println!("{}", "Style check passed".green());
                true
            }
            Err(e) => {
                report_toolchain_failure("Style check", &e);
                println!("{}", "Style check failed".red());
                false
            }
        })
    };

    let verdict = if build {
        let comparator = ImageComparator::new(HostTool::new(&config.compare_tool), &work_dir)
            .with_timeout(limits.compare)
            .with_max_error(config.max_error);
        let runner = ScenarioRunner::new(
            program_path(&work_dir, &config.program_name),
            work_dir.clone(),
            limits,
            comparator,
        );
        runner
            .run_battery(&scenarios)
            .iter()
            .map(ScenarioOutcome::passed)
            .collect()
    } else {
        warn!("Skipping {} tests because the build failed", scenarios.len());
        vec![false; scenarios.len()]
    };

    Ok(GradeReport::new(config.part, build, lint, verdict))
}

fn program_path(work_dir: &Path, program_name: &str) -> PathBuf {
    work_dir.join(program_name)
}
