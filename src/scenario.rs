use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::exit_code::ExitClass;
use crate::expect::ExpectedPhrase;

pub const REQUIRED_EXTENSION: &str = ".gif";
pub const PRODUCED_IMAGE: &str = "test_output.gif";
pub const SAMPLE_IMAGE: &str = "sample_images/sample_image.gif";
pub const MESSAGE: &str = "CPSC 120A";

// Scenario sets, one per assignment part:
// part-1  animated gradient  <output.gif>
// part-2  make message       <output.gif> <message>
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub enum Part {
    #[value(name = "part-1")]
    #[serde(rename = "part-1")]
    AnimatedGradient,
    #[value(name = "part-2")]
    #[serde(rename = "part-2")]
    MakeMessage,
}

impl Part {
    /// Files the submission must contain; these are also the files the style
    /// pass inspects.
    pub fn source_files(self) -> &'static [&'static str] {
        match self {
            Part::AnimatedGradient => &[
                "animated_gradient.cc",
                "animated_gradient_functions.cc",
                "animated_gradient_functions.h",
            ],
            Part::MakeMessage => &[
                "make_message.cc",
                "make_message_functions.cc",
                "make_message_functions.h",
            ],
        }
    }

    fn success_args(self) -> Vec<String> {
        match self {
            Part::AnimatedGradient => vec![PRODUCED_IMAGE.to_string()],
            Part::MakeMessage => vec![PRODUCED_IMAGE.to_string(), MESSAGE.to_string()],
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Part::AnimatedGradient => "part-1",
            Part::MakeMessage => "part-2",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Malformed invocation the program must reject.
    ArgumentError,
    /// Well-formed invocation the program must complete.
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCheck {
    pub expected: PathBuf,
    pub produced: PathBuf,
}

/// One fixed test case. Fields are set once by the constructors and only
/// read afterwards.
#[derive(Debug, Clone)]
pub struct Scenario {
    kind: ScenarioKind,
    args: Vec<String>,
    expected_output: Option<ExpectedPhrase>,
    exit: ExitClass,
    image: Option<ImageCheck>,
}

impl Scenario {
    /// The program must print `phrase` and exit non-zero.
    pub fn rejects(args: Vec<String>, phrase: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            kind: ScenarioKind::ArgumentError,
            args,
            expected_output: Some(ExpectedPhrase::new(phrase)?),
            exit: ExitClass::NonZero,
            image: None,
        })
    }

    /// The program must exit zero and leave `produced` close enough to
    /// `expected`.
    pub fn produces(
        args: Vec<String>,
        produced: impl Into<PathBuf>,
        expected: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind: ScenarioKind::Success,
            args,
            expected_output: None,
            exit: ExitClass::Zero,
            image: Some(ImageCheck {
                expected: expected.into(),
                produced: produced.into(),
            }),
        }
    }

    pub fn kind(&self) -> ScenarioKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn expected_output(&self) -> Option<&ExpectedPhrase> {
        self.expected_output.as_ref()
    }

    pub fn exit(&self) -> ExitClass {
        self.exit
    }

    pub fn image(&self) -> Option<&ImageCheck> {
        self.image.as_ref()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str("no arguments")?;
        } else {
            write!(f, "{:?}", self.args)?;
        }
        if let Some(phrase) = &self.expected_output {
            write!(f, " expecting \"{}\"", phrase.phrase())?;
        }
        if let Some(image) = &self.image {
            write!(f, " compared against {}", image.expected.display())?;
        }
        Ok(())
    }
}

/// The ordered battery for `part`: argument errors first, then the
/// image-producing run.
pub fn battery(part: Part) -> Result<Vec<Scenario>, regex::Error> {
    let bad_path = "/foobar";
    Ok(vec![
        Scenario::rejects(Vec::new(), "Please provide a path to a file")?,
        Scenario::rejects(
            vec![bad_path.to_string()],
            &missing_extension_message(bad_path, REQUIRED_EXTENSION),
        )?,
        Scenario::produces(part.success_args(), PRODUCED_IMAGE, SAMPLE_IMAGE),
    ])
}

pub fn missing_extension_message(path: impl AsRef<Path>, extension: &str) -> String {
    format!(
        "{} is missing the required file extension {extension}.",
        path.as_ref().display()
    )
}
