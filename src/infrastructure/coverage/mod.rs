//! Ecosystem coverage analyzers
//!
//! One [`CoverageAnalyzer`] per supported toolchain. Detection probes them
//! in a fixed order and the first match drives the session:
//! Go, Swift, Python, TypeScript/JavaScript, Java.

pub mod discovery;
pub mod go;
pub mod java;
pub mod process;
pub mod python;
pub mod report;
pub mod swift;
pub mod typescript;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use go::GoAnalyzer;
pub use java::JavaAnalyzer;
pub use process::{ProcessOutput, ToolRunner};
pub use python::PythonAnalyzer;
pub use swift::SwiftAnalyzer;
pub use typescript::TypeScriptAnalyzer;

use crate::domain::error::ToolError;
use crate::domain::ports::CoverageAnalyzer;

/// All analyzers in probe order, each killing tool runs after `timeout`.
pub fn default_analyzers(timeout: Duration) -> Vec<Arc<dyn CoverageAnalyzer>> {
    vec![
        Arc::new(GoAnalyzer::new(timeout)),
        Arc::new(SwiftAnalyzer::new(timeout)),
        Arc::new(PythonAnalyzer::new(timeout)),
        Arc::new(TypeScriptAnalyzer::new(timeout)),
        Arc::new(JavaAnalyzer::new(timeout)),
    ]
}

/// First analyzer in probe order that recognizes `project`.
pub fn detect_analyzer(
    project: &Path,
    timeout: Duration,
) -> Result<Arc<dyn CoverageAnalyzer>, ToolError> {
    if !project.is_dir() {
        return Err(ToolError::UnsupportedProject(project.to_path_buf()));
    }

    let analyzer = default_analyzers(timeout)
        .into_iter()
        .find(|analyzer| analyzer.detect(project))
        .ok_or_else(|| ToolError::UnsupportedProject(project.to_path_buf()))?;

    info!(language = analyzer.name(), project = %project.display(), "detected ecosystem");
    Ok(analyzer)
}
