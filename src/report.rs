//! Rendering test results for humans and for machines.

use std::path::Path;

use console::style;
use serde::Serialize;

use crate::suite::{TestResult, TestStatus};
use crate::validator::ValidationTally;

/// One test outcome as it appears in `--json` output.
#[derive(Clone, Debug, Serialize)]
pub struct TestRecord {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    pub test: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TestRecord {
    pub fn new(path: &Path, plugin_id: Option<&str>, result: &TestResult) -> Self {
        Self {
            path: path.display().to_string(),
            plugin_id: plugin_id.map(str::to_string),
            test: result.name.clone(),
            status: result.status.as_str(),
            details: result.details.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TallySummary {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub warnings: u32,
}

impl From<&ValidationTally> for TallySummary {
    fn from(tally: &ValidationTally) -> Self {
        Self {
            passed: tally.passed,
            failed: tally.failed,
            skipped: tally.skipped,
            warnings: tally.warnings,
        }
    }
}

/// The complete `validate --json` document.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub results: Vec<TestRecord>,
    pub summary: TallySummary,
}

pub fn print_path_header(path: &Path) {
    println!();
    println!("Validating: {}", style(path.display()).bold());
}

pub fn print_section_header(section: &str) {
    println!("  {section}:");
}

pub fn print_plugin_header(name: &str, id: &str) {
    println!("  Plugin: {} ({})", style(name).bold(), id);
}

pub fn print_note(note: &str) {
    println!("  {}", style(note).dim());
}

/// Prints a single `[PASS]`-style result line with optional indented details.
pub fn print_test_result(result: &TestResult, only_failed: bool) {
    if only_failed && !result.is_failed_or_warning() {
        return;
    }

    let status = match result.status {
        TestStatus::Success => style("PASS").green(),
        TestStatus::Failed => style("FAIL").red(),
        TestStatus::Crashed => style("CRASH").red().bold(),
        TestStatus::Warning => style("WARN").yellow(),
        TestStatus::Skipped => style("SKIP").dim(),
    };

    println!("    [{status}] {}", result.name);
    if let Some(details) = &result.details {
        println!("           {}", style(details).dim());
    }
}

pub fn print_summary(tally: &ValidationTally) {
    println!();
    println!("Summary:");
    println!("  Passed:   {}", tally.passed);
    println!("  Failed:   {}", tally.failed);
    println!("  Skipped:  {}", tally.skipped);
    println!("  Warnings: {}", tally.warnings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_record_schema() {
        let result = TestResult::failed(
            "features-duplicates",
            "No duplicate features",
            Some("Duplicate feature found: 'audio-effect'".to_string()),
        );
        let record = TestRecord::new(
            &PathBuf::from("/plugins/example.clap"),
            Some("com.example.gain"),
            &result,
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["path"], "/plugins/example.clap");
        assert_eq!(json["plugin_id"], "com.example.gain");
        assert_eq!(json["test"], "features-duplicates");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["details"], "Duplicate feature found: 'audio-effect'");
    }

    #[test]
    fn test_record_omits_absent_fields() {
        let result = TestResult::success("scan-time", "Scan quickly", None);
        let record = TestRecord::new(&PathBuf::from("/p.clap"), None, &result);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("plugin_id").is_none());
        assert!(json.get("details").is_none());
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn test_json_report_includes_summary() {
        let mut tally = ValidationTally::default();
        tally.record(TestStatus::Success);
        tally.record(TestStatus::Failed);
        tally.record(TestStatus::Crashed);
        tally.record(TestStatus::Skipped);
        tally.record(TestStatus::Warning);

        let report = JsonReport {
            results: Vec::new(),
            summary: TallySummary::from(&tally),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["passed"], 1);
        // Crashes count as failures.
        assert_eq!(json["summary"]["failed"], 2);
        assert_eq!(json["summary"]["skipped"], 1);
        assert_eq!(json["summary"]["warnings"], 1);
    }
}
