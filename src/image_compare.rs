use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::driver::{DriverError, Invocation};
use crate::runner_file_utils::ToolLocator;

/// Largest tolerated peak absolute error, as a fraction of full scale.
pub const MAX_ERROR: f64 = 0.0015;

/// Where the comparison tool writes its highlighted difference image,
/// relative to the working directory.
pub const DIFF_IMAGE: &str = "diff.png";

pub const COMPARE_TIMEOUT: Duration = Duration::from_secs(4);

static CHANNEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Red|Green|Blue|Total):\s+([-+0-9.eE]+)\s+([-+0-9.eE]+)")
        .expect("channel line pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
    Total,
}

impl Channel {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "red" => Some(Channel::Red),
            "green" => Some(Channel::Green),
            "blue" => Some(Channel::Blue),
            "total" => Some(Channel::Total),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Red => "Red",
            Channel::Green => "Green",
            Channel::Blue => "Blue",
            Channel::Total => "Total",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelError {
    pub peak: f64,
    pub normalized: f64,
}

impl ChannelError {
    /// Strictly above the limit fails; exactly at it passes.
    pub fn within(&self, max_error: f64) -> bool {
        self.peak <= max_error
    }

    pub fn percent(&self) -> f64 {
        self.peak * 100.0
    }
}

/// Per-channel figures read from the tool's textual report. Lines that do
/// not look like `<Channel>: <float> <float>` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaeReport {
    channels: BTreeMap<Channel, ChannelError>,
}

impl PaeReport {
    pub fn parse(text: &str) -> Self {
        let mut channels = BTreeMap::new();
        for line in text.lines() {
            let Some(caps) = CHANNEL_LINE.captures(line) else {
                continue;
            };
            let Some(channel) = Channel::from_name(&caps[1]) else {
                continue;
            };
            let (Ok(peak), Ok(normalized)) = (caps[2].parse::<f64>(), caps[3].parse::<f64>()) else {
                continue;
            };
            channels.insert(channel, ChannelError { peak, normalized });
        }
        Self { channels }
    }

    pub fn get(&self, channel: Channel) -> Option<ChannelError> {
        self.channels.get(&channel).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, ChannelError)> + '_ {
        self.channels.iter().map(|(channel, error)| (*channel, *error))
    }
}

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("missing {tool}; cannot verify output")]
    ToolUnavailable { tool: String },
    #[error("missing output or sample output: {} does not exist", path.display())]
    ArtifactMissing { path: PathBuf },
    #[error("missing total error measure in analysis")]
    ParseFailure { report: String },
    #[error("comparison tool did not finish within {limit:?}")]
    TimedOut { limit: Duration, report: String },
    #[error(transparent)]
    Tool(#[from] DriverError),
}

/// A parsed report whose total channel is known to be present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageComparison {
    pub total: ChannelError,
    pub report: PaeReport,
    pub max_error: f64,
}

impl ImageComparison {
    /// Only the total channel decides the verdict.
    pub fn passed(&self) -> bool {
        self.total.within(self.max_error)
    }

    /// Every reported channel with its advisory pass mark.
    pub fn channels(&self) -> impl Iterator<Item = (Channel, ChannelError, bool)> + '_ {
        self.report
            .iter()
            .map(|(channel, error)| (channel, error, error.within(self.max_error)))
    }
}

/// Runs the host's image comparison tool on an expected and a produced
/// image and judges the peak absolute error it reports.
pub struct ImageComparator<L> {
    locator: L,
    work_dir: PathBuf,
    timeout: Duration,
    max_error: f64,
}

impl<L: ToolLocator> ImageComparator<L> {
    pub fn new(locator: L, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            locator,
            work_dir: work_dir.into(),
            timeout: COMPARE_TIMEOUT,
            max_error: MAX_ERROR,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_error(mut self, max_error: f64) -> Self {
        self.max_error = max_error;
        self
    }

    /// Relative paths resolve against the working directory. Overwrites
    /// [`DIFF_IMAGE`] there.
    pub fn compare(&self, expected: &Path, produced: &Path) -> Result<ImageComparison, CompareError> {
        let tool = self
            .locator
            .locate()
            .ok_or_else(|| CompareError::ToolUnavailable {
                tool: self.locator.name().to_string(),
            })?;

        for path in [expected, produced] {
            if !self.work_dir.join(path).is_file() {
                return Err(CompareError::ArtifactMissing {
                    path: path.to_path_buf(),
                });
            }
        }

        let run = Invocation::new(tool, self.timeout)
            .args(["compare", "-metric", "PAE"])
            .args(["-highlight-style", "XOR", "-highlight-color", "purple"])
            .args(["-file", DIFF_IMAGE])
            .arg(expected)
            .arg(produced)
            .current_dir(&self.work_dir)
            .run()?;

        let text = run.output_lossy().into_owned();
        if run.timed_out() {
            return Err(CompareError::TimedOut {
                limit: self.timeout,
                report: text,
            });
        }

        let report = PaeReport::parse(&text);
        let total = report
            .get(Channel::Total)
            .ok_or(CompareError::ParseFailure { report: text })?;

        Ok(ImageComparison {
            total,
            report,
            max_error: self.max_error,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner_file_utils::FixedTool;
    use crate::test_support::{pae_report, write_compare_tool, write_script};
    use std::fs;
    use tempdir::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new("compare").unwrap();
        fs::create_dir(dir.path().join("sample_images")).unwrap();
        fs::write(dir.path().join("sample_images/sample_image.gif"), "GIF89a").unwrap();
        fs::write(dir.path().join("test_output.gif"), "GIF89a").unwrap();
        dir
    }

    fn compare_with(dir: &TempDir, report: &str) -> Result<ImageComparison, CompareError> {
        let tool = write_compare_tool(dir.path(), report);
        ImageComparator::new(FixedTool::at(tool), dir.path()).compare(
            Path::new("sample_images/sample_image.gif"),
            Path::new("test_output.gif"),
        )
    }

    #[test]
    fn parses_all_four_channels() {
        let report = PaeReport::parse(&pae_report(0.001, 0.0005, 0.0, 0.001));

        assert_eq!(report.iter().count(), 4);
        assert_eq!(report.get(Channel::Green).unwrap().peak, 0.0005);
        let total = report.get(Channel::Total).unwrap();
        assert!((total.normalized - 0.255).abs() < 1e-9);
    }

    #[test]
    fn channel_names_are_case_insensitive() {
        let report = PaeReport::parse("TOTAL: 0.5 0.25\nred: 0.1 0.2\n");
        assert_eq!(report.get(Channel::Total).unwrap().peak, 0.5);
        assert_eq!(report.get(Channel::Red).unwrap().normalized, 0.2);
    }

    #[test]
    fn accepts_integer_and_exponent_figures() {
        let report = PaeReport::parse("Red: 0 0\nBlue: 1.5e-3 0.38\nTotal: 1E-4 2\n");

        assert_eq!(report.get(Channel::Red).unwrap().peak, 0.0);
        assert_eq!(report.get(Channel::Blue).unwrap().peak, 0.0015);
        assert_eq!(report.get(Channel::Total).unwrap().peak, 0.0001);
        assert_eq!(report.get(Channel::Total).unwrap().normalized, 2.0);
    }

    #[test]
    fn malformed_figures_are_skipped() {
        let report = PaeReport::parse("Total: 1.2.3 e\nGreen: 0.1 0.2\n");

        assert_eq!(report.get(Channel::Total), None);
        assert_eq!(report.get(Channel::Green).unwrap().peak, 0.1);
    }

    #[test]
    fn channel_pattern_compiles() {
        assert!(CHANNEL_LINE.is_match("Total: 0.1 0.2"));
    }

    #[test]
    fn small_total_error_passes() {
        let dir = workspace();
        let comparison = compare_with(&dir, &pae_report(0.001, 0.001, 0.001, 0.001)).unwrap();

        assert!(comparison.passed());
        assert_eq!(comparison.channels().count(), 4);
        assert!(comparison.channels().all(|(_, _, ok)| ok));
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let dir = workspace();
        let at_limit = compare_with(&dir, &pae_report(0.0, 0.0, 0.0, 0.0015)).unwrap();
        assert!(at_limit.passed());

        let over = compare_with(&dir, &pae_report(0.0, 0.0, 0.0, 0.0016)).unwrap();
        assert!(!over.passed());
    }

    #[test]
    fn only_total_decides_the_verdict() {
        let dir = workspace();
        let comparison = compare_with(&dir, &pae_report(0.5, 0.0, 0.0, 0.001)).unwrap();

        assert!(comparison.passed());
        let red = comparison
            .channels()
            .find(|(channel, _, _)| *channel == Channel::Red)
            .unwrap();
        assert!(!red.2);
    }

    #[test]
    fn missing_total_is_a_parse_failure() {
        let dir = workspace();
        let report = "Red: 0.0001 0.01\nGreen: 0.0001 0.01\nBlue: 0.0001 0.01";

        let err = compare_with(&dir, report).unwrap_err();

        assert!(matches!(err, CompareError::ParseFailure { .. }), "{err}");
    }

    #[test]
    fn missing_tool_fails_before_anything_runs() {
        let dir = workspace();
        let err = ImageComparator::new(FixedTool::missing("gm"), dir.path())
            .compare(Path::new("sample_images/sample_image.gif"), Path::new("test_output.gif"))
            .unwrap_err();

        assert!(matches!(err, CompareError::ToolUnavailable { .. }));
        assert_eq!(err.to_string(), "missing gm; cannot verify output");
        assert!(!dir.path().join(DIFF_IMAGE).exists());
    }

    #[test]
    fn missing_image_is_reported_by_path() {
        let dir = workspace();
        fs::remove_file(dir.path().join("test_output.gif")).unwrap();

        let err = compare_with(&dir, &pae_report(0.0, 0.0, 0.0, 0.0)).unwrap_err();

        match err {
            CompareError::ArtifactMissing { path } => {
                assert_eq!(path, PathBuf::from("test_output.gif"))
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn asks_for_peak_error_and_a_diff_image_in_the_work_dir() {
        let dir = workspace();
        let tool = write_script(
            dir.path(),
            "recording_gm",
            &format!(
                "echo \"$@\" > args.txt\n: > {DIFF_IMAGE}\necho 'Total: 0.0000000000 0.0000000000'"
            ),
        );

        let comparison = ImageComparator::new(FixedTool::at(tool), dir.path())
            .compare(Path::new("sample_images/sample_image.gif"), Path::new("test_output.gif"))
            .unwrap();

        assert!(comparison.passed());
        let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(
            args.trim(),
            "compare -metric PAE -highlight-style XOR -highlight-color purple -file diff.png \
             sample_images/sample_image.gif test_output.gif"
        );
        assert!(dir.path().join(DIFF_IMAGE).exists());
    }

    #[test]
    fn hung_tool_times_out() {
        let dir = workspace();
        let tool = write_script(dir.path(), "hung_gm", "sleep 30");

        let err = ImageComparator::new(FixedTool::at(tool), dir.path())
            .with_timeout(Duration::from_millis(200))
            .compare(Path::new("sample_images/sample_image.gif"), Path::new("test_output.gif"))
            .unwrap_err();

        assert!(matches!(err, CompareError::TimedOut { .. }), "{err}");
    }
}
