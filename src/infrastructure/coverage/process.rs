//! Running toolchain commands with a hard timeout.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::error::ToolError;

/// Captured result of one finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

/// Spawns toolchain commands inside the project directory.
///
/// Every command is killed when it exceeds the timeout; a child is never left
/// running behind the session.
#[derive(Debug, Clone, Copy)]
pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program args...` in `cwd`. A non-zero exit is a normal
    /// [`ProcessOutput`]; only spawn failures and timeouts are errors.
    pub async fn run<I, S>(&self, program: &str, args: I, cwd: &Path) -> Result<ProcessOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        debug!(
            program,
            args = ?args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(),
            cwd = %cwd.display(),
            "running tool"
        );

        let child = Command::new(program)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                warn!(program, timeout_secs = self.timeout.as_secs(), "tool timed out, killed");
                return Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        debug!(program, status = ?output.status.code(), "tool finished");
        Ok(ProcessOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: combined,
        })
    }
}
