//! End-to-end checks for the validation driver that do not require a real
//! plugin binary: missing libraries, name filtering, and the result model.

use std::path::{Path, PathBuf};

use clap_validator::suite::{self, TestFilter, TestStatus};
use clap_validator::validator::{validate, ValidatorSettings};

#[test]
fn missing_library_fails_every_stage_but_never_panics() {
    let settings = ValidatorSettings {
        paths: vec![PathBuf::from("/does/not/exist.clap")],
        json: true,
        ..Default::default()
    };

    let tally = validate(&settings);

    // All seven library tests run against the missing file, and the driver
    // counts one more failure when the library cannot be loaded for the
    // instance tests. No instance tests run.
    assert_eq!(tally.total(), 8);
    assert_eq!(tally.passed, 0);
    assert!(tally.has_failures());
    // Everything except the possibly-skipped RTLD_NOW probe is a failure.
    assert!(tally.failed >= 7);
}

#[test]
fn library_tests_report_the_load_error() {
    let result = suite::run_library_test("scan-time", Path::new("/does/not/exist.clap"));
    assert_eq!(result.status, TestStatus::Failed);
    assert!(result.details.is_some());

    let result = suite::run_library_test("query-factory-nonexistent", Path::new("/nope.clap"));
    assert_eq!(result.status, TestStatus::Failed);
}

#[test]
fn unknown_test_names_are_failures_with_details() {
    let result = suite::run_library_test("not-a-real-test", Path::new("/x.clap"));
    assert_eq!(result.status, TestStatus::Failed);
    assert!(result
        .details
        .as_deref()
        .unwrap()
        .contains("Test 'not-a-real-test' not found"));
}

#[test]
fn filter_partitions_the_whole_catalog() {
    let mut names: Vec<&'static str> = Vec::new();
    names.extend(suite::library::all_tests().iter().map(|info| info.name));
    names.extend(suite::plugin::all_tests().iter().map(|info| info.name));
    assert_eq!(names.len(), 21);

    for pattern in ["param", "STATE", "basic$", "[invalid"] {
        let normal = TestFilter::new(Some(pattern.to_string()), false);
        let inverted = TestFilter::new(Some(pattern.to_string()), true);
        for name in &names {
            assert!(
                normal.matches(name) ^ inverted.matches(name),
                "pattern {pattern:?} must partition {name:?}"
            );
        }
    }
}

#[test]
fn filter_selects_the_expected_subset() {
    let filter = TestFilter::new(Some("^state-".to_string()), false);
    let selected: Vec<_> = suite::plugin::all_tests()
        .iter()
        .map(|info| info.name)
        .filter(|name| filter.matches(name))
        .collect();
    assert_eq!(
        selected,
        [
            "state-invalid",
            "state-reproducibility-basic",
            "state-reproducibility-null-cookies",
            "state-reproducibility-flush",
            "state-buffered-streams",
        ]
    );
}
