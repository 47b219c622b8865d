use regex::bytes::{Regex, RegexBuilder};
use thiserror::Error;

/// A human-readable phrase the program under test must print somewhere in
/// its output.
///
/// Matching ignores case and lets every run of spaces in the phrase stand
/// for one or more whitespace characters, so wrapped or padded output still
/// counts. Everything else in the phrase is literal: a `.` in a file name
/// only matches a dot.
#[derive(Debug, Clone)]
pub struct ExpectedPhrase {
    phrase: String,
    pattern: Regex,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("could not find expected output \"{expected}\"")]
pub struct ExpectationMiss {
    pub expected: String,
    /// Everything the program printed.
    pub output: String,
}

impl ExpectedPhrase {
    pub fn new(phrase: impl Into<String>) -> Result<Self, regex::Error> {
        let phrase = phrase.into();
        let pattern = RegexBuilder::new(&phrase_pattern(&phrase))
            .case_insensitive(true)
            .build()?;
        Ok(Self { phrase, pattern })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn is_match(&self, output: &[u8]) -> bool {
        self.pattern.is_match(output)
    }

    pub fn check(&self, output: &[u8]) -> Result<(), ExpectationMiss> {
        if self.is_match(output) {
            return Ok(());
        }
        Err(ExpectationMiss {
            expected: self.phrase.clone(),
            output: String::from_utf8_lossy(output).into_owned(),
        })
    }
}

fn phrase_pattern(phrase: &str) -> String {
    let mut pattern = String::with_capacity(phrase.len() * 2);
    let mut in_gap = false;
    for (i, word) in phrase.split(' ').enumerate() {
        if i > 0 {
            in_gap = true;
        }
        if word.is_empty() {
            continue;
        }
        if in_gap {
            pattern.push_str(r"\s+");
            in_gap = false;
        }
        pattern.push_str(&regex::escape(word));
    }
    if in_gap {
        pattern.push_str(r"\s+");
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrase(text: &str) -> ExpectedPhrase {
        ExpectedPhrase::new(text).unwrap()
    }

    #[test]
    fn ignores_case() {
        let expected = phrase("please provide a path to a file");
        assert!(expected.is_match(b"PLEASE PROVIDE A PATH TO A FILE"));
    }

    #[test]
    fn tolerates_extra_and_wrapped_whitespace() {
        let expected = phrase("a path to");
        assert!(expected.is_match(b"give a   path\nto something"));
        assert!(!expected.is_match(b"a pathto"));
    }

    #[test]
    fn space_runs_collapse_into_one_gap() {
        assert_eq!(phrase_pattern("a  b"), r"a\s+b");
        assert_eq!(phrase_pattern(" a"), r"\s+a");
        assert_eq!(phrase_pattern("a "), r"a\s+");
        assert!(phrase("a   b").is_match(b"a b"));
    }

    #[test]
    fn matches_anywhere_in_the_output() {
        let expected = phrase("Please provide a path to a file");
        assert!(expected.is_match(b"usage error\nPlease provide a path to a file.\nbye\n"));
    }

    #[test]
    fn metacharacters_are_literal() {
        let expected = phrase("/foobar is missing the required file extension .gif.");
        assert!(expected.is_match(b"/foobar is missing the required file extension .gif.\n"));
        assert!(!expected.is_match(b"/foobar is missing the required file extension xgif!\n"));
        assert!(phrase("(a+b)*").is_match(b"(A+B)*"));
    }

    #[test]
    fn miss_carries_the_whole_output() {
        let expected = phrase("Please provide a path to a file");
        let miss = expected.check(b"Segmentation fault\nline two\n").unwrap_err();
        assert_eq!(miss.expected, "Please provide a path to a file");
        assert_eq!(miss.output, "Segmentation fault\nline two\n");
    }

    #[test]
    fn non_utf8_output_still_matches() {
        let expected = phrase("done");
        assert!(expected.check(b"\xff\xfe done \xff").is_ok());
    }
}
