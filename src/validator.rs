//! The run driver: walks every requested path through the library-level and
//! instance-level test catalogs and keeps the running tally.

use std::path::PathBuf;

use tracing::debug;

use crate::library::PluginLibrary;
use crate::report::{self, JsonReport, TallySummary, TestRecord};
use crate::suite::{self, TestFilter, TestStatus};

/// Settings for a validation run.
#[derive(Clone, Debug, Default)]
pub struct ValidatorSettings {
    /// The plugin libraries to validate.
    pub paths: Vec<PathBuf>,
    /// Only run tests for the plugin with this ID.
    pub plugin_id: Option<String>,
    /// Only run tests whose name matches this pattern.
    pub test_filter: Option<String>,
    /// Invert the test filter.
    pub invert_filter: bool,
    /// Emit machine-readable JSON instead of human output.
    pub json: bool,
    /// Only print tests that failed or warned.
    pub only_failed: bool,
    /// Run the plugins inside the validator's own process. This is the only
    /// supported mode; the flag is accepted for command-line compatibility.
    pub in_process: bool,
}

/// Running counts over a whole validation run. Crashed results count as
/// failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationTally {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub warnings: u32,
}

impl ValidationTally {
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Success => self.passed += 1,
            TestStatus::Failed | TestStatus::Crashed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Warning => self.warnings += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped + self.warnings
    }

    /// Whether the run should exit with a non-zero status. Warnings do not
    /// count.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Runs the full validation suite over every path in the settings and prints
/// the results. Returns the tally so the caller can pick the exit code.
pub fn validate(settings: &ValidatorSettings) -> ValidationTally {
    let filter = TestFilter::new(settings.test_filter.clone(), settings.invert_filter);
    let mut tally = ValidationTally::default();
    let mut records = Vec::new();

    for path in &settings.paths {
        if !settings.json {
            report::print_path_header(path);
            report::print_section_header("Library tests");
        }

        for test in suite::library::all_tests() {
            if !filter.matches(test.name) {
                continue;
            }

            let result = suite::run_library_test(test.name, path);
            tally.record(result.status);
            if settings.json {
                records.push(TestRecord::new(path, None, &result));
            } else {
                report::print_test_result(&result, settings.only_failed);
            }
        }

        // Load the library once more to run the per-plugin tests. Failures
        // here count once against the run; the library tests above already
        // reported the details.
        let metadata = PluginLibrary::load(path).and_then(|library| {
            library.metadata().map(|metadata| (library, metadata))
        });
        let (library, metadata) = match metadata {
            Ok(loaded) => loaded,
            Err(err) => {
                debug!(path = %path.display(), %err, "skipping instance tests");
                if !settings.json {
                    report::print_note(&format!("Error loading library: {err}"));
                }
                tally.failed += 1;
                continue;
            }
        };

        if !metadata.is_clap_version_compatible() {
            if !settings.json {
                report::print_note(&format!(
                    "Skipping: incompatible CLAP version {}.{}.{}",
                    metadata.clap_version.0, metadata.clap_version.1, metadata.clap_version.2
                ));
            }
            continue;
        }

        for plugin_metadata in &metadata.plugins {
            if settings
                .plugin_id
                .as_ref()
                .is_some_and(|filter_id| filter_id != &plugin_metadata.id)
            {
                continue;
            }

            if !settings.json {
                report::print_plugin_header(&plugin_metadata.name, &plugin_metadata.id);
            }

            for test in suite::plugin::all_tests() {
                if !filter.matches(test.name) {
                    continue;
                }

                let result = suite::run_plugin_test(test.name, &library, &plugin_metadata.id);
                tally.record(result.status);
                if settings.json {
                    records.push(TestRecord::new(path, Some(&plugin_metadata.id), &result));
                } else {
                    report::print_test_result(&result, settings.only_failed);
                }
            }
        }
    }

    if settings.json {
        let json_report = JsonReport {
            results: records,
            summary: TallySummary::from(&tally),
        };
        match serde_json::to_string_pretty(&json_report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("Error: could not serialize the results: {err}"),
        }
    } else {
        report::print_summary(&tally);
    }

    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_and_exit_condition() {
        let mut tally = ValidationTally::default();
        assert!(!tally.has_failures());

        tally.record(TestStatus::Success);
        tally.record(TestStatus::Skipped);
        tally.record(TestStatus::Warning);
        assert_eq!(tally.total(), 3);
        // Warnings alone never fail a run.
        assert!(!tally.has_failures());

        tally.record(TestStatus::Crashed);
        assert_eq!(tally.failed, 1);
        assert!(tally.has_failures());

        tally.record(TestStatus::Failed);
        assert_eq!(tally.failed, 2);
        assert_eq!(tally.total(), 5);
    }

    #[test]
    fn test_validate_missing_library_counts_one_failure_per_stage() {
        let settings = ValidatorSettings {
            paths: vec![PathBuf::from("/does/not/exist.clap")],
            // Keep the run quiet and small: only the scan-time test plus the
            // failed library load should count.
            test_filter: Some("scan-time".to_string()),
            json: true,
            ..Default::default()
        };

        let tally = validate(&settings);
        // scan-time fails and the driver counts one more failure for the
        // library that could not be loaded.
        assert_eq!(tally.failed, 2);
        assert_eq!(tally.passed, 0);
        assert!(tally.has_failures());
    }

    #[test]
    fn test_validate_with_everything_filtered_out() {
        let settings = ValidatorSettings {
            paths: vec![PathBuf::from("/does/not/exist.clap")],
            test_filter: Some("no-test-has-this-name".to_string()),
            json: true,
            ..Default::default()
        };

        let tally = validate(&settings);
        // Only the failed library load is recorded.
        assert_eq!(tally.total(), 1);
        assert_eq!(tally.failed, 1);
    }
}
