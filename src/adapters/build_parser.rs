//! Build log parser (spec §4.G): not a long-lived `Adapter` like the log
//! streamers, since it's invoked on demand by the HTTP API with a chunk of
//! `xcodebuild`/`xcodebuild test` output. Parses diagnostics into
//! `LogEntry`s (fed through the normal pipeline so they're classified and
//! deduplicated like any other source) and returns a `BuildResult`.

use crate::model::{Level, LogEntry, SourceTag};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub outcome: BuildOutcome,
    pub error_count: usize,
    pub warning_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub level: String,
    pub message: String,
}

fn diagnostic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:(?P<file>[^:\n]+):(?P<line>\d+):\d+:\s*)?(?P<level>error|warning):\s*(?P<message>.+)$")
            .expect("valid build diagnostic regex")
    })
}

/// Parse raw `xcodebuild` output, emitting one `LogEntry` per diagnostic
/// line into `process` and returning the aggregate result.
pub fn parse_build_output(output: &str, process: &str) -> (BuildResult, Vec<LogEntry>) {
    let mut diagnostics = Vec::new();
    let mut entries = Vec::new();
    let mut error_count = 0;
    let mut warning_count = 0;

    for caps in diagnostic_pattern().captures_iter(output) {
        let level_str = &caps["level"];
        let message = caps["message"].trim().to_string();
        let file = caps.name("file").map(|m| m.as_str().to_string());
        let line = caps.name("line").and_then(|m| m.as_str().parse().ok());

        let level = if level_str == "error" {
            error_count += 1;
            Level::Error
        } else {
            warning_count += 1;
            Level::Warning
        };

        diagnostics.push(Diagnostic {
            file: file.clone(),
            line,
            level: level_str.to_string(),
            message: message.clone(),
        });

        let entry_message = match (&file, line) {
            (Some(f), Some(l)) => format!("{f}:{l}: {message}"),
            _ => message,
        };
        entries.push(LogEntry::new(SourceTag::Build, Some(process.to_string()), level, "default", entry_message));
    }

    let outcome = if output.contains("** BUILD SUCCEEDED **") {
        BuildOutcome::Succeeded
    } else if output.contains("** BUILD FAILED **") || error_count > 0 {
        BuildOutcome::Failed
    } else {
        BuildOutcome::Unknown
    };

    (
        BuildResult {
            outcome,
            error_count,
            warning_count,
            diagnostics,
        },
        entries,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_error_and_warning_lines() {
        let output = "\
/Users/dev/App/ViewController.swift:42:5: error: cannot find 'foo' in scope
/Users/dev/App/ViewController.swift:10:1: warning: unused variable 'x'
** BUILD FAILED **
";
        let (result, entries) = parse_build_output(output, "xcodebuild");
        assert_eq!(result.error_count, 1);
        assert_eq!(result.warning_count, 1);
        assert_eq!(result.outcome, BuildOutcome::Failed);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Level::Error);
    }

    #[test]
    fn succeeded_build_with_no_diagnostics() {
        let output = "Compiling...\n** BUILD SUCCEEDED **\n";
        let (result, entries) = parse_build_output(output, "xcodebuild");
        assert_eq!(result.outcome, BuildOutcome::Succeeded);
        assert!(entries.is_empty());
    }
}
