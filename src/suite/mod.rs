//! The validation test catalog: result model, name filter, and dispatch.
//!
//! Tests come in two levels. Library tests take a path and exercise loading
//! behaviour; plugin tests take a loaded library plus a plugin ID and
//! exercise one instance. Every test returns a [`TestResult`]; a panic inside
//! a test is caught at the dispatch boundary and reported as `Crashed`.

pub mod library;
pub mod plugin;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use regex::RegexBuilder;

use crate::library::PluginLibrary;

/// The status of a finished test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestStatus {
    Success,
    Crashed,
    Failed,
    Skipped,
    Warning,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Success => "success",
            TestStatus::Crashed => "crashed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Warning => "warning",
        }
    }
}

/// The result of running a single test case.
#[derive(Clone, Debug)]
pub struct TestResult {
    pub name: String,
    pub description: String,
    pub status: TestStatus,
    pub details: Option<String>,
}

impl TestResult {
    pub fn success(
        name: impl Into<String>,
        description: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: TestStatus::Success,
            details,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        description: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: TestStatus::Failed,
            details,
        }
    }

    pub fn skipped(
        name: impl Into<String>,
        description: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: TestStatus::Skipped,
            details,
        }
    }

    pub fn warning(
        name: impl Into<String>,
        description: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: TestStatus::Warning,
            details,
        }
    }

    pub fn crashed(
        name: impl Into<String>,
        description: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: TestStatus::Crashed,
            details: Some(details.into()),
        }
    }

    /// Whether the result counts against the run for `--only-failed` style
    /// filtering. Warnings are included; skips are not.
    pub fn is_failed_or_warning(&self) -> bool {
        matches!(
            self.status,
            TestStatus::Failed | TestStatus::Crashed | TestStatus::Warning
        )
    }
}

/// A catalog entry describing an available test case.
#[derive(Clone, Debug)]
pub struct TestCaseInfo {
    pub name: &'static str,
    pub description: String,
}

/// An optional test-name filter with an invert flag.
///
/// The pattern is compiled as a case-insensitive regex; when that fails it
/// degrades to a literal (case-sensitive) substring match instead of
/// reporting an error. A test is admitted iff `match XOR invert`.
pub struct TestFilter {
    pattern: Option<String>,
    compiled: Option<regex::Regex>,
    invert: bool,
}

impl TestFilter {
    pub fn new(pattern: Option<String>, invert: bool) -> Self {
        let compiled = pattern.as_ref().and_then(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
        });

        Self {
            pattern,
            compiled,
            invert,
        }
    }

    /// Admits everything.
    pub fn all() -> Self {
        Self::new(None, false)
    }

    pub fn matches(&self, test_name: &str) -> bool {
        let Some(pattern) = &self.pattern else {
            return true;
        };

        let matched = match &self.compiled {
            Some(regex) => regex.is_match(test_name),
            None => test_name.contains(pattern.as_str()),
        };

        matched != self.invert
    }
}

/// Runs a library-level test by name, converting panics into `Crashed`.
pub fn run_library_test(test_name: &str, library_path: &Path) -> TestResult {
    catch_crashes(test_name, || library::run_test(test_name, library_path))
}

/// Runs a plugin-level test by name, converting panics into `Crashed`.
pub fn run_plugin_test(test_name: &str, library: &PluginLibrary, plugin_id: &str) -> TestResult {
    catch_crashes(test_name, || {
        plugin::run_test(test_name, library, plugin_id)
    })
}

fn catch_crashes(test_name: &str, run: impl FnOnce() -> TestResult) -> TestResult {
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(result) => result,
        Err(payload) => TestResult::crashed(
            test_name,
            "The test panicked while running.",
            panic_message(payload),
        ),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_strings() {
        assert_eq!(TestStatus::Success.as_str(), "success");
        assert_eq!(TestStatus::Crashed.as_str(), "crashed");
        assert_eq!(TestStatus::Failed.as_str(), "failed");
        assert_eq!(TestStatus::Skipped.as_str(), "skipped");
        assert_eq!(TestStatus::Warning.as_str(), "warning");
    }

    #[test]
    fn test_result_constructors() {
        assert_eq!(
            TestResult::success("a", "b", None).status,
            TestStatus::Success
        );
        assert_eq!(TestResult::failed("a", "b", None).status, TestStatus::Failed);
        assert_eq!(
            TestResult::skipped("a", "b", None).status,
            TestStatus::Skipped
        );
        assert_eq!(
            TestResult::warning("a", "b", None).status,
            TestStatus::Warning
        );
        assert_eq!(
            TestResult::crashed("a", "b", "boom").status,
            TestStatus::Crashed
        );
    }

    #[test]
    fn test_failed_or_warning_classification() {
        assert!(!TestResult::success("a", "b", None).is_failed_or_warning());
        assert!(!TestResult::skipped("a", "b", None).is_failed_or_warning());
        assert!(TestResult::failed("a", "b", None).is_failed_or_warning());
        assert!(TestResult::warning("a", "b", None).is_failed_or_warning());
        assert!(TestResult::crashed("a", "b", "boom").is_failed_or_warning());
    }

    #[test]
    fn test_filter_without_pattern_admits_everything() {
        let filter = TestFilter::all();
        assert!(filter.matches("scan-time"));
        assert!(filter.matches("anything"));
    }

    #[test]
    fn test_filter_regex_is_case_insensitive() {
        let filter = TestFilter::new(Some("STATE-.*basic".to_string()), false);
        assert!(filter.matches("state-reproducibility-basic"));
        assert!(!filter.matches("param-fuzz-basic"));
    }

    #[test]
    fn test_filter_invert() {
        let filter = TestFilter::new(Some("state".to_string()), true);
        assert!(!filter.matches("state-invalid"));
        assert!(filter.matches("scan-time"));
    }

    #[test]
    fn test_filter_is_complementary() {
        let names = ["scan-time", "state-invalid", "param-fuzz-basic"];
        for pattern in ["state", "(unclosed", "fuzz"] {
            let normal = TestFilter::new(Some(pattern.to_string()), false);
            let inverted = TestFilter::new(Some(pattern.to_string()), true);
            for name in names {
                assert!(
                    normal.matches(name) ^ inverted.matches(name),
                    "filter for {pattern:?} must partition {name:?}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_regex_degrades_to_substring() {
        // "(state" does not compile as a regex; as a literal it only matches
        // names containing the parenthesis.
        let filter = TestFilter::new(Some("(state".to_string()), false);
        assert!(!filter.matches("state-invalid"));
        assert!(filter.matches("weird-(state-test"));

        // And the literal fallback is case sensitive.
        let filter = TestFilter::new(Some("(STATE".to_string()), false);
        assert!(!filter.matches("weird-(state-test"));
    }

    #[test]
    fn test_unknown_library_test_name() {
        let result = run_library_test("does-not-exist", Path::new("/tmp/x.clap"));
        assert_eq!(result.status, TestStatus::Failed);
        assert!(result
            .details
            .as_deref()
            .unwrap()
            .contains("Test 'does-not-exist' not found"));
    }

    #[test]
    fn test_panics_are_reported_as_crashes() {
        let result = catch_crashes("exploding", || panic!("kaboom"));
        assert_eq!(result.status, TestStatus::Crashed);
        assert_eq!(result.details.as_deref(), Some("kaboom"));
    }

    #[test]
    fn test_catalogs_are_fixed() {
        let library_tests = library::all_tests();
        let plugin_tests = plugin::all_tests();

        let library_names: Vec<_> = library_tests.iter().map(|info| info.name).collect();
        assert_eq!(
            library_names,
            [
                "scan-time",
                "scan-rtld-now",
                "query-factory-nonexistent",
                "create-id-with-trailing-garbage",
                "preset-discovery-crawl",
                "preset-discovery-descriptor-consistency",
                "preset-discovery-load",
            ]
        );

        let plugin_names: Vec<_> = plugin_tests.iter().map(|info| info.name).collect();
        assert_eq!(
            plugin_names,
            [
                "descriptor-consistency",
                "features-categories",
                "features-duplicates",
                "process-audio-out-of-place-basic",
                "process-note-out-of-place-basic",
                "process-note-inconsistent",
                "param-conversions",
                "param-fuzz-basic",
                "param-set-wrong-namespace",
                "state-invalid",
                "state-reproducibility-basic",
                "state-reproducibility-null-cookies",
                "state-reproducibility-flush",
                "state-buffered-streams",
            ]
        );
    }
}
