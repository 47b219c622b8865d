use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::image_compare::MAX_ERROR;
use crate::scenario::Part;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Which scenario set to run (part-1, part-2)
    #[arg(value_enum)]
    pub part: Part,

    /// Directory containing the submission
    pub target_directory: PathBuf,

    /// Executable produced by the build, relative to the target directory
    pub program_name: String,

    /// Terminal coloring
    #[arg(short = 'c', long, value_parser = ["on", "off"])]
    pub color: Option<String>,

    /// Quiet (use -q through -qqq)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Debug information
    #[arg(long)]
    pub debug: bool,

    /// Don't run make before testing
    #[arg(long)]
    pub nomake: bool,

    /// Skip the coding style check
    #[arg(long)]
    pub no_lint: bool,

    /// Image comparison tool looked up on PATH
    #[arg(long, default_value = "gm")]
    pub compare_tool: String,

    /// Static analysis tool looked up on PATH
    #[arg(long, default_value = "clang-tidy")]
    pub tidy: String,

    /// Largest tolerated total peak absolute error (fraction)
    #[arg(long, default_value_t = MAX_ERROR)]
    pub max_error: f64,

    /// Build time limit (300 seconds)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value = "300")]
    pub limit_make: u32,

    /// Style check time limit (120 seconds)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value = "120")]
    pub limit_lint: u32,

    /// Time limit for invocations that must fail (1 second)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value = "1")]
    pub limit_error: u32,

    /// Time limit for invocations that must succeed (60 seconds)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value = "60")]
    pub limit_run: u32,

    /// Image comparison time limit (4 seconds)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value = "4")]
    pub limit_compare: u32,

    /// Produce autograder output
    #[arg(long)]
    pub autograder: bool,
}

/// Time limits for each kind of subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub make: Duration,
    pub lint: Duration,
    pub error_run: Duration,
    pub success_run: Duration,
    pub compare: Duration,
}

impl Cli {
    pub fn limits(&self) -> Limits {
        let secs = |limit: u32| Duration::from_secs(u64::from(limit));
        Limits {
            make: secs(self.limit_make),
            lint: secs(self.limit_lint),
            error_run: secs(self.limit_error),
            success_run: secs(self.limit_run),
            compare: secs(self.limit_compare),
        }
    }

    pub fn color(&self) -> Option<bool> {
        self.color.as_deref().map(|c| c == "on")
    }
}
