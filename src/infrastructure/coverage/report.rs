//! Throwaway report locations and report loading.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::domain::error::ToolError;

/// A report location inside a private temp directory, removed on drop.
#[derive(Debug)]
pub struct ScratchPath {
    _dir: TempDir,
    path: PathBuf,
}

impl ScratchPath {
    /// A path for a report file, e.g. `<tmp>/coverage-agent-go-XXXX/report.out`.
    pub fn file(stem: &str, extension: &str) -> std::io::Result<Self> {
        let dir = scratch_dir(stem)?;
        let path = dir.path().join(format!("report.{extension}"));
        Ok(Self { _dir: dir, path })
    }

    /// An empty directory the tool writes its reports into.
    pub fn dir(stem: &str) -> std::io::Result<Self> {
        let dir = scratch_dir(stem)?;
        let path = dir.path().to_path_buf();
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn scratch_dir(stem: &str) -> std::io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix(&format!("coverage-agent-{stem}-"))
        .tempdir()
}

/// Read a report the tool should have produced. A missing file is reported
/// together with the tool output that explains it.
pub fn read_report(path: &Path, tool_output: &str) -> Result<String, ToolError> {
    if !path.is_file() {
        return Err(ToolError::MissingReport {
            path: path.to_path_buf(),
            output: tool_output.to_string(),
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Shorthand for a [`ToolError::MalformedReport`].
pub fn malformed(path: &Path, reason: impl std::fmt::Display) -> ToolError {
    ToolError::MalformedReport {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
