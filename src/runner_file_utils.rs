use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Answers whether an external tool can run on this host, and from where.
pub trait ToolLocator {
    fn name(&self) -> &str;

    fn locate(&self) -> Option<PathBuf>;
}

/// Looks the tool up on `PATH` each time it is asked.
#[derive(Debug, Clone)]
pub struct HostTool {
    name: String,
}

impl HostTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ToolLocator for HostTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn locate(&self) -> Option<PathBuf> {
        which::which(&self.name).ok()
    }
}

/// A tool at a known location, or known to be absent.
#[derive(Debug, Clone)]
pub struct FixedTool {
    name: String,
    path: Option<PathBuf>,
}

impl FixedTool {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            path: Some(path),
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }
}

impl ToolLocator for FixedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn locate(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

/// Resolves the submission's required source files inside `dir`, failing
/// with every missing name at once.
pub fn collect_submission_files<P>(dir: P, names: &[&str]) -> Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    if !dir.is_dir() {
        bail!("Path is not a directory: {}", dir.display());
    }

    let (found, missing): (Vec<_>, Vec<_>) = names
        .iter()
        .map(|name| (*name, dir.join(name)))
        .partition(|(_, path)| path.is_file());

    if !missing.is_empty() {
        let missing: Vec<_> = missing.into_iter().map(|(name, _)| name).collect();
        bail!(
            "Missing required files in {}: {}",
            dir.display(),
            missing.join(", ")
        );
    }

    Ok(found.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn finds_all_named_files_in_order() {
        let dir = TempDir::new("submission").unwrap();
        fs::write(dir.path().join("b.cc"), "").unwrap();
        fs::write(dir.path().join("a.h"), "").unwrap();

        let files = collect_submission_files(dir.path(), &["b.cc", "a.h"]).unwrap();

        assert_eq!(files, vec![dir.path().join("b.cc"), dir.path().join("a.h")]);
    }

    #[test]
    fn reports_every_missing_file() {
        let dir = TempDir::new("submission").unwrap();
        fs::write(dir.path().join("present.cc"), "").unwrap();

        let err = collect_submission_files(dir.path(), &["present.cc", "x.cc", "y.h"])
            .unwrap_err()
            .to_string();

        assert!(err.contains("x.cc, y.h"), "{err}");
    }

    #[test]
    fn rejects_a_missing_directory() {
        let dir = TempDir::new("submission").unwrap();
        assert!(collect_submission_files(dir.path().join("nope"), &["a.cc"]).is_err());
    }

    #[test]
    fn fixed_tool_reports_its_name_and_location() {
        let tool = FixedTool::at("/opt/bin/gm");
        assert_eq!(tool.name(), "gm");
        assert_eq!(tool.locate(), Some(PathBuf::from("/opt/bin/gm")));

        let absent = FixedTool::missing("gm");
        assert_eq!(absent.name(), "gm");
        assert_eq!(absent.locate(), None);
    }

    #[test]
    fn host_lookup_misses_unknown_tools() {
        assert_eq!(HostTool::new("definitely-not-a-real-tool-4711").locate(), None);
    }
}
