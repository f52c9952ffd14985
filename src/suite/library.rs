//! Tests for entire plugin libraries: scanning behaviour, factory queries,
//! and creation with bogus IDs.

use std::path::Path;
use std::time::Instant;

use super::{TestCaseInfo, TestResult};
use crate::host::Host;
use crate::library::PluginLibrary;

/// Scanning a library and reading all of its metadata should stay under this
/// budget; slower plugins get flagged with a warning.
const SCAN_TIME_LIMIT_MS: u128 = 100;

const NONEXISTENT_FACTORY_ID: &str = "com.nonexistent.factory.that.should.not.exist";
const GARBAGE_ID_SUFFIX: &str = "_GARBAGE_THAT_SHOULD_NOT_MATCH";
const PRESET_DISCOVERY_FACTORY_ID: &str = "clap.preset-discovery-factory/2";

pub fn all_tests() -> Vec<TestCaseInfo> {
    vec![
        TestCaseInfo {
            name: "scan-time",
            description: format!(
                "Checks whether the plugin can be scanned in under {SCAN_TIME_LIMIT_MS} \
                 milliseconds."
            ),
        },
        TestCaseInfo {
            name: "scan-rtld-now",
            description: "Loads the plugin with immediate symbol binding to detect unresolved \
                          symbols. Only run on Unix-like platforms."
                .to_string(),
        },
        TestCaseInfo {
            name: "query-factory-nonexistent",
            description: "Tries to query a factory from the plugin's entry point with a \
                          non-existent ID. This should return a null pointer."
                .to_string(),
        },
        TestCaseInfo {
            name: "create-id-with-trailing-garbage",
            description: "Attempts to create a plugin instance using an existing plugin ID with \
                          some extra text appended to the end. This should fail."
                .to_string(),
        },
        TestCaseInfo {
            name: "preset-discovery-crawl",
            description: "Crawls all of the presets supported by the plugin's preset discovery \
                          factories."
                .to_string(),
        },
        TestCaseInfo {
            name: "preset-discovery-descriptor-consistency",
            description: "Checks that the preset provider descriptors stored on the provider \
                          objects match the factory's."
                .to_string(),
        },
        TestCaseInfo {
            name: "preset-discovery-load",
            description: "Loads presets found by the preset discovery factories into the plugin."
                .to_string(),
        },
    ]
}

pub fn run_test(test_name: &str, library_path: &Path) -> TestResult {
    let Some(info) = all_tests().into_iter().find(|info| info.name == test_name) else {
        return TestResult::failed(
            test_name,
            "Unknown test",
            Some(format!("Test '{test_name}' not found")),
        );
    };

    match info.name {
        "scan-time" => test_scan_time(info, library_path),
        "scan-rtld-now" => test_scan_rtld_now(info, library_path),
        "query-factory-nonexistent" => test_query_nonexistent_factory(info, library_path),
        "create-id-with-trailing-garbage" => test_create_id_with_garbage(info, library_path),
        _ => test_preset_discovery_stub(info, library_path),
    }
}

fn test_scan_time(info: TestCaseInfo, library_path: &Path) -> TestResult {
    let start = Instant::now();

    let metadata = PluginLibrary::load(library_path).and_then(|library| library.metadata());
    if let Err(err) = metadata {
        return TestResult::failed(info.name, info.description, Some(err.to_string()));
    }

    let elapsed_ms = start.elapsed().as_millis();
    if elapsed_ms > SCAN_TIME_LIMIT_MS {
        TestResult::warning(
            info.name,
            info.description,
            Some(format!(
                "Plugin took {elapsed_ms}ms to scan (limit: {SCAN_TIME_LIMIT_MS}ms)"
            )),
        )
    } else {
        TestResult::success(
            info.name,
            info.description,
            Some(format!("Plugin scanned in {elapsed_ms}ms")),
        )
    }
}

/// The regular load path uses lazy binding, which can paper over unresolved
/// symbols until they are first called. Binding eagerly surfaces them now.
#[cfg(unix)]
fn test_scan_rtld_now(info: TestCaseInfo, library_path: &Path) -> TestResult {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    let absolute_path = match std::path::absolute(library_path) {
        Ok(path) => path,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };
    let module_path = match crate::library::module_path_for(&absolute_path) {
        Ok(path) => path,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };

    match unsafe { UnixLibrary::open(Some(&module_path), RTLD_LOCAL | RTLD_NOW) } {
        // The handle drops here, closing the library again.
        Ok(_library) => TestResult::success(info.name, info.description, None),
        Err(err) => TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "Loading with immediate symbol binding failed: {err}"
            )),
        ),
    }
}

#[cfg(not(unix))]
fn test_scan_rtld_now(info: TestCaseInfo, _library_path: &Path) -> TestResult {
    TestResult::skipped(
        info.name,
        info.description,
        Some("Only supported on Unix-like platforms".to_string()),
    )
}

fn test_query_nonexistent_factory(info: TestCaseInfo, library_path: &Path) -> TestResult {
    let library = match PluginLibrary::load(library_path) {
        Ok(library) => library,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };

    if library.factory_exists(NONEXISTENT_FACTORY_ID) {
        TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "The plugin returned a non-null pointer when asked for a factory with the \
                 non-existent ID '{NONEXISTENT_FACTORY_ID}'"
            )),
        )
    } else {
        TestResult::success(info.name, info.description, None)
    }
}

fn test_create_id_with_garbage(info: TestCaseInfo, library_path: &Path) -> TestResult {
    let library = match PluginLibrary::load(library_path) {
        Ok(library) => library,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };
    let metadata = match library.metadata() {
        Ok(metadata) => metadata,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };

    let Some(first_plugin) = metadata.plugins.first() else {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("The library does not contain any plugins".to_string()),
        );
    };

    let invalid_id = format!("{}{GARBAGE_ID_SUFFIX}", first_plugin.id);
    let host = Host::new();
    match library.create_plugin(&invalid_id, host) {
        Ok(_plugin) => TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "A plugin was created with the invalid ID '{invalid_id}' (this should have \
                 returned a null pointer)"
            )),
        ),
        Err(_) => TestResult::success(
            info.name,
            info.description,
            Some("The plugin correctly rejected the ID with trailing garbage".to_string()),
        ),
    }
}

fn test_preset_discovery_stub(info: TestCaseInfo, library_path: &Path) -> TestResult {
    let library = match PluginLibrary::load(library_path) {
        Ok(library) => library,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };

    if !library.factory_exists(PRESET_DISCOVERY_FACTORY_ID) {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("The plugin does not implement the preset discovery factory".to_string()),
        );
    }

    TestResult::skipped(
        info.name,
        info.description,
        Some("Preset discovery tests are not yet implemented".to_string()),
    )
}
