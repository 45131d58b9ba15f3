//! Prompt construction and response cleanup for the generation backend.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::domain::ports::{GenerationRequest, RepairReason, RepairRequest};

const ANSWER_FORMAT: &str = "Reply with ONLY the complete test file, without explanations. \
The file must be ready to save and run as-is.";

/// Prompt asking for a new test file for one unit.
pub fn generation_prompt(request: &GenerationRequest) -> String {
    let language = &request.language;
    format!(
        "You are an expert {language} test engineer. Write unit tests for the source file below.\n\
         \n\
         Language: {language}\n\
         Source file: {unit}\n\
         Test file to create: {artifact}\n\
         Current coverage: {coverage:.1}%\n\
         \n\
         SOURCE CODE:\n{source}\n\
         \n\
         UNCOVERED LINES:\n{lines}\n\
         \n\
         The tests must:\n\
         1. Exercise the uncovered lines listed above\n\
         2. Follow {language} testing conventions and use the project's test framework\n\
         3. Cover edge cases and error paths\n\
         4. Compile and pass against the current source\n\
         \n\
         {ANSWER_FORMAT}",
        unit = request.unit_id,
        artifact = request.artifact_path.display(),
        coverage = request.current_coverage,
        source = request.unit_source,
        lines = format_uncovered_lines(&request.uncovered_lines),
    )
}

/// Prompt asking for a revised test file. The wording depends on why the
/// existing artifact needs work.
pub fn repair_prompt(request: &RepairRequest) -> String {
    let language = &request.language;
    let mut prompt = String::new();

    match &request.reason {
        RepairReason::CoverageGap { uncovered_lines } => {
            let _ = write!(
                prompt,
                "You are an expert {language} test engineer. The existing tests below leave part \
                 of the source uncovered. Extend them.\n\n\
                 Language: {language}\n\
                 Source file: {unit}\n\
                 Test file: {artifact}\n\n\
                 SOURCE CODE:\n{source}\n\n\
                 EXISTING TESTS:\n{tests}\n\n\
                 UNCOVERED LINES:\n{lines}\n\n\
                 Keep every existing test working and add cases for the uncovered lines.\n\n",
                unit = request.unit_id,
                artifact = request.artifact_path.display(),
                source = request.unit_source,
                tests = request.artifact_source,
                lines = format_uncovered_lines(uncovered_lines),
            );
        }
        RepairReason::CompilationFailure { output } => {
            let _ = write!(
                prompt,
                "You are an expert {language} test engineer. The test file below does not \
                 compile. Fix it.\n\n\
                 Language: {language}\n\
                 Source file: {unit}\n\
                 Test file: {artifact}\n\n\
                 SOURCE CODE:\n{source}\n\n\
                 CURRENT TEST CODE:\n{tests}\n\n\
                 COMPILER OUTPUT:\n{output}\n\n\
                 Fix imports, names and types so the file compiles against the source above. \
                 Do not remove meaningful test cases.\n\n",
                unit = request.unit_id,
                artifact = request.artifact_path.display(),
                source = request.unit_source,
                tests = request.artifact_source,
            );
        }
        RepairReason::TestFailure {
            output,
            failed_tests,
        } => {
            let failing = if failed_tests.is_empty() {
                "(not identified)".to_string()
            } else {
                failed_tests.join(", ")
            };
            let _ = write!(
                prompt,
                "You are an expert {language} test engineer. The test file below compiles but \
                 some tests fail. Fix them.\n\n\
                 Language: {language}\n\
                 Source file: {unit}\n\
                 Test file: {artifact}\n\
                 Failing tests: {failing}\n\n\
                 SOURCE CODE:\n{source}\n\n\
                 CURRENT TEST CODE:\n{tests}\n\n\
                 TEST OUTPUT:\n{output}\n\n\
                 Fix the root cause in the tests. The source file is correct; do not assert \
                 behavior it does not have.\n\n",
                unit = request.unit_id,
                artifact = request.artifact_path.display(),
                source = request.unit_source,
                tests = request.artifact_source,
            );
        }
    }

    prompt.push_str(ANSWER_FORMAT);
    prompt
}

/// Render line numbers as compact ranges: `Line 3, Lines 7-9`.
pub fn format_uncovered_lines(lines: &BTreeSet<u32>) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &line in lines {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == line => *end = line,
            _ => ranges.push((line, line)),
        }
    }

    if ranges.is_empty() {
        return "None reported (line detail unavailable)".to_string();
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                format!("Line {start}")
            } else {
                format!("Lines {start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pull the artifact body out of a model response.
///
/// Returns the contents of the first fenced block when there is one (the
/// info string after the opening fence is dropped), otherwise the whole
/// response trimmed.
pub fn extract_artifact_body(response: &str) -> String {
    let Some(open) = response.find("```") else {
        return response.trim().to_string();
    };

    let after_open = &response[open + 3..];
    let body_start = after_open.find('\n').map_or(after_open.len(), |i| i + 1);
    let body = &after_open[body_start..];
    let body = body.find("```").map_or(body, |close| &body[..close]);

    body.trim().to_string()
}
