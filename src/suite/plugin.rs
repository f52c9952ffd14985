//! Tests for individual plugin instances: descriptors, features, audio
//! processing, parameters, and state handling.
//!
//! Every test builds a fresh [`Host`] and plugin instance. After a test body
//! that would pass, the host's thread-discipline slot is consulted; a
//! recorded violation turns the pass into a failure.

use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;

use clap_sys::events::{clap_event_param_value, CLAP_CORE_EVENT_SPACE_ID};
use clap_sys::ext::params::clap_param_info;
use clap_sys::id::clap_id;
use clap_sys::process::CLAP_PROCESS_ERROR;
use rand::Rng;

use super::{TestCaseInfo, TestResult};
use crate::host::{AudioThreadGuard, Host};
use crate::instance::PluginInstance;
use crate::library::{PluginLibrary, PluginMetadata};
use crate::process::{self, AudioBlock, InputEventList, OutputEventSink};
use crate::stream::{InputStream, OutputStream};

const SAMPLE_RATE: f64 = 44_100.0;
const BLOCK_SIZE: u32 = 512;

/// How many random parameter permutations the fuzz test applies, and how many
/// blocks of random audio are processed per permutation.
const FUZZ_PERMUTATIONS: u32 = 50;
const FUZZ_RUNS_PER_PERMUTATION: u32 = 5;

/// An event space ID that is definitely not the CLAP core namespace. Events
/// tagged with it must be ignored entirely.
const WRONG_NAMESPACE_SPACE_ID: u16 = 0xB33F;

/// The CLAP feature tags that mark a plugin's main category.
const MAIN_CATEGORY_FEATURES: [&str; 5] = [
    "instrument",
    "audio-effect",
    "note-effect",
    "note-detector",
    "analyzer",
];

pub fn all_tests() -> Vec<TestCaseInfo> {
    vec![
        TestCaseInfo {
            name: "descriptor-consistency",
            description: "The plugin descriptor returned from the plugin factory and the \
                          descriptor stored on the 'clap_plugin' object should be equivalent."
                .to_string(),
        },
        TestCaseInfo {
            name: "features-categories",
            description: "The plugin needs to have at least one of the main CLAP category \
                          features."
                .to_string(),
        },
        TestCaseInfo {
            name: "features-duplicates",
            description: "The plugin's features array should not contain any duplicates."
                .to_string(),
        },
        TestCaseInfo {
            name: "process-audio-out-of-place-basic",
            description: "Processes a simple audio signal through the plugin with its default \
                          parameter values, out of place, and checks that the output does not \
                          contain any non-finite values."
                .to_string(),
        },
        TestCaseInfo {
            name: "process-note-out-of-place-basic",
            description: "Runs the basic out-of-place processing check for plugins that expose \
                          at least one input note port."
                .to_string(),
        },
        TestCaseInfo {
            name: "process-note-inconsistent",
            description: "Smoke test for plugins with input note ports using the basic \
                          out-of-place processing setup."
                .to_string(),
        },
        TestCaseInfo {
            name: "param-conversions",
            description: "Asserts that parameter information can be queried for every one of \
                          the plugin's parameters."
                .to_string(),
        },
        TestCaseInfo {
            name: "param-fuzz-basic",
            description: "Processes random audio through the plugin while setting its \
                          parameters to random permutations, and checks that the output stays \
                          finite."
                .to_string(),
        },
        TestCaseInfo {
            name: "param-set-wrong-namespace",
            description: "Sends events to the plugin that look like parameter value events but \
                          have the wrong namespace ID. The plugin's parameter values must not \
                          change."
                .to_string(),
        },
        TestCaseInfo {
            name: "state-invalid",
            description: "Tries to load state from an empty stream. The plugin should report \
                          failure instead of accepting it."
                .to_string(),
        },
        TestCaseInfo {
            name: "state-reproducibility-basic",
            description: "Saves the plugin's state, loads it into a fresh instance, saves \
                          again, and checks that the two states are identical."
                .to_string(),
        },
        TestCaseInfo {
            name: "state-reproducibility-null-cookies",
            description: "The state reproducibility check with all cookie fields in parameter \
                          events set to null pointers."
                .to_string(),
        },
        TestCaseInfo {
            name: "state-reproducibility-flush",
            description: "The state reproducibility check with parameter values applied \
                          through clap_plugin_params::flush() instead of processing."
                .to_string(),
        },
        TestCaseInfo {
            name: "state-buffered-streams",
            description: "Saves state and loads it back through a stream that only hands out a \
                          few bytes per read, to check that the plugin does not make \
                          assumptions about read sizes."
                .to_string(),
        },
    ]
}

pub fn run_test(test_name: &str, library: &PluginLibrary, plugin_id: &str) -> TestResult {
    let Some(info) = all_tests().into_iter().find(|info| info.name == test_name) else {
        return TestResult::failed(
            test_name,
            "Unknown test",
            Some(format!("Test '{test_name}' not found")),
        );
    };

    match info.name {
        "descriptor-consistency" => test_descriptor_consistency(info, library, plugin_id),
        "features-categories" => test_features_categories(info, library, plugin_id),
        "features-duplicates" => test_features_duplicates(info, library, plugin_id),
        "process-audio-out-of-place-basic" => test_process_audio_basic(info, library, plugin_id),
        "process-note-out-of-place-basic" | "process-note-inconsistent" => {
            test_process_note_smoke(info, library, plugin_id)
        }
        "param-conversions" => test_param_conversions(info, library, plugin_id),
        "param-fuzz-basic" => test_param_fuzz_basic(info, library, plugin_id),
        "param-set-wrong-namespace" => test_param_wrong_namespace(info, library, plugin_id),
        "state-invalid" => test_state_invalid(info, library, plugin_id),
        "state-reproducibility-basic" => run_state_reproducibility(
            info,
            library,
            plugin_id,
            CookieMode::FromParamInfo,
            ApplyMode::Process,
        ),
        "state-reproducibility-null-cookies" => run_state_reproducibility(
            info,
            library,
            plugin_id,
            CookieMode::Null,
            ApplyMode::Process,
        ),
        "state-reproducibility-flush" => run_state_reproducibility(
            info,
            library,
            plugin_id,
            CookieMode::FromParamInfo,
            ApplyMode::Flush,
        ),
        _ => test_state_buffered_streams(info, library, plugin_id),
    }
}

/// A parameter's identity and value range, read through `get_info()`.
struct ParamSpec {
    id: clap_id,
    min_value: f64,
    max_value: f64,
    cookie: *mut c_void,
}

#[derive(Clone, Copy)]
enum CookieMode {
    /// Pass the cookie the plugin advertised in its parameter info.
    FromParamInfo,
    /// Pass null cookies; plugins must treat those as valid.
    Null,
}

#[derive(Clone, Copy)]
enum ApplyMode {
    /// Deliver parameter events through a processing call.
    Process,
    /// Deliver parameter events through `clap_plugin_params::flush()` while
    /// the plugin is inactive.
    Flush,
}

fn create_initialized(
    library: &PluginLibrary,
    plugin_id: &str,
) -> Result<(Arc<Host>, PluginInstance), String> {
    let host = Host::new();
    let mut plugin = library
        .create_plugin(plugin_id, Arc::clone(&host))
        .map_err(|err| err.to_string())?;
    if !plugin.init() {
        return Err(format!(
            "clap_plugin::init() returned false for '{plugin_id}'"
        ));
    }

    Ok((host, plugin))
}

/// Demotes a would-be pass to a failure when the host recorded a
/// thread-discipline violation during the test.
fn finish(host: &Host, result: TestResult) -> TestResult {
    match host.callback_error() {
        Some(error) if !result.is_failed_or_warning() => {
            TestResult::failed(result.name, result.description, Some(error))
        }
        _ => result,
    }
}

/// Reads all parameter specs. `None` means the params extension is missing;
/// an error means `get_info()` misbehaved.
fn collect_params(plugin: &PluginInstance) -> Result<Option<Vec<ParamSpec>>, String> {
    let Some(params) = plugin.params() else {
        return Ok(None);
    };

    let count = unsafe {
        match params.count {
            Some(count) => count(plugin.as_raw()),
            None => 0,
        }
    };
    let get_info = params
        .get_info
        .ok_or("clap_plugin_params::get_info is a null pointer")?;

    let mut specs = Vec::with_capacity(count as usize);
    for index in 0..count {
        let mut info: clap_param_info = unsafe { std::mem::zeroed() };
        if !unsafe { get_info(plugin.as_raw(), index, &mut info) } {
            return Err(format!(
                "clap_plugin_params::get_info() returned false for parameter index {index}"
            ));
        }
        specs.push(ParamSpec {
            id: info.id,
            min_value: info.min_value,
            max_value: info.max_value,
            cookie: info.cookie,
        });
    }

    Ok(Some(specs))
}

fn read_param_values(plugin: &PluginInstance, specs: &[ParamSpec]) -> Result<Vec<f64>, String> {
    let params = plugin
        .params()
        .ok_or("Plugin does not support params extension")?;
    let get_value = params
        .get_value
        .ok_or("clap_plugin_params::get_value is a null pointer")?;

    specs
        .iter()
        .map(|spec| {
            let mut value = 0.0f64;
            if unsafe { get_value(plugin.as_raw(), spec.id, &mut value) } {
                Ok(value)
            } else {
                Err(format!(
                    "clap_plugin_params::get_value() returned false for parameter {}",
                    spec.id
                ))
            }
        })
        .collect()
}

/// One `CLAP_EVENT_PARAM_VALUE` per parameter, each with a uniform random
/// value within the parameter's declared range.
fn random_param_events(
    specs: &[ParamSpec],
    space_id: u16,
    cookies: CookieMode,
    rng: &mut impl Rng,
) -> Vec<clap_event_param_value> {
    specs
        .iter()
        .map(|spec| {
            let value = if spec.min_value < spec.max_value {
                rng.gen_range(spec.min_value..=spec.max_value)
            } else {
                spec.min_value
            };
            let cookie = match cookies {
                CookieMode::FromParamInfo => spec.cookie,
                CookieMode::Null => ptr::null_mut(),
            };
            process::param_value_event(space_id, spec.id, cookie, value)
        })
        .collect()
}

fn input_note_port_count(plugin: &PluginInstance) -> Option<u32> {
    let note_ports = plugin.note_ports()?;
    let count = note_ports.count?;
    Some(unsafe { count(plugin.as_raw(), true) })
}

fn save_state(plugin: &PluginInstance) -> Result<Vec<u8>, String> {
    let state = plugin
        .state()
        .ok_or("Plugin does not support state extension")?;
    let save = state
        .save
        .ok_or("clap_plugin_state::save is a null pointer")?;

    let stream = OutputStream::new();
    if unsafe { save(plugin.as_raw(), stream.as_raw()) } {
        Ok(stream.into_bytes())
    } else {
        Err("clap_plugin_state::save() returned false".to_string())
    }
}

fn load_state(plugin: &PluginInstance, stream: Box<InputStream>) -> Result<bool, String> {
    let state = plugin
        .state()
        .ok_or("Plugin does not support state extension")?;
    let load = state
        .load
        .ok_or("clap_plugin_state::load is a null pointer")?;

    Ok(unsafe { load(plugin.as_raw(), stream.as_raw()) })
}

/// Activates the plugin, runs one out-of-place processing call over a ramp
/// signal, and checks the status and output. Shared by the audio and note
/// smoke tests.
fn run_audio_smoke(info: TestCaseInfo, host: &Arc<Host>, mut plugin: PluginInstance) -> TestResult {
    if !plugin.activate(SAMPLE_RATE, BLOCK_SIZE, BLOCK_SIZE) {
        return TestResult::failed(
            info.name,
            info.description,
            Some("clap_plugin::activate() returned false".to_string()),
        );
    }

    let mut block = AudioBlock::ramp(BLOCK_SIZE);
    let status;
    {
        let _guard = AudioThreadGuard::new(host);
        if !plugin.start_processing() {
            return TestResult::failed(
                info.name,
                info.description,
                Some("clap_plugin::start_processing() returned false".to_string()),
            );
        }

        let events = InputEventList::empty();
        status = process::process_once(&mut plugin, &mut block, &events, 0);
        plugin.stop_processing();
    }
    plugin.deactivate();

    if status == CLAP_PROCESS_ERROR {
        return TestResult::failed(
            info.name,
            info.description,
            Some("clap_plugin::process() returned CLAP_PROCESS_ERROR".to_string()),
        );
    }
    if let Some(index) = block.first_non_finite_output() {
        return TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "The output contains a non-finite value at sample {index}"
            )),
        );
    }

    finish(host, TestResult::success(info.name, info.description, None))
}

fn test_descriptor_consistency(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    let Some(descriptor) = plugin.descriptor() else {
        return TestResult::failed(
            info.name,
            info.description,
            Some("The plugin instance does not expose a descriptor".to_string()),
        );
    };
    let instance_metadata = match unsafe { PluginMetadata::from_descriptor(descriptor) } {
        Ok(metadata) => metadata,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err.to_string())),
    };

    let factory_metadata = match lookup_factory_metadata(library, plugin_id) {
        Ok(metadata) => metadata,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    if factory_metadata.id != instance_metadata.id {
        return TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "Plugin ID mismatch: factory='{}', instance='{}'",
                factory_metadata.id, instance_metadata.id
            )),
        );
    }
    if factory_metadata.name != instance_metadata.name {
        return TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "Plugin name mismatch: factory='{}', instance='{}'",
                factory_metadata.name, instance_metadata.name
            )),
        );
    }

    finish(&host, TestResult::success(info.name, info.description, None))
}

fn lookup_factory_metadata(
    library: &PluginLibrary,
    plugin_id: &str,
) -> Result<PluginMetadata, String> {
    let metadata = library.metadata().map_err(|err| err.to_string())?;
    metadata
        .plugins
        .into_iter()
        .find(|plugin| plugin.id == plugin_id)
        .ok_or_else(|| format!("Plugin ID '{plugin_id}' not found in the factory's descriptors"))
}

fn test_features_categories(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let metadata = match lookup_factory_metadata(library, plugin_id) {
        Ok(metadata) => metadata,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    let has_main_category = metadata
        .features
        .iter()
        .any(|feature| MAIN_CATEGORY_FEATURES.contains(&feature.as_str()));
    if has_main_category {
        TestResult::success(info.name, info.description, None)
    } else {
        TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "The plugin does not have any of the main category features ({})",
                MAIN_CATEGORY_FEATURES.join(", ")
            )),
        )
    }
}

fn test_features_duplicates(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let metadata = match lookup_factory_metadata(library, plugin_id) {
        Ok(metadata) => metadata,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    let mut seen = std::collections::HashSet::new();
    for feature in &metadata.features {
        if !seen.insert(feature.as_str()) {
            return TestResult::failed(
                info.name,
                info.description,
                Some(format!("Duplicate feature found: '{feature}'")),
            );
        }
    }

    TestResult::success(info.name, info.description, None)
}

fn test_process_audio_basic(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    run_audio_smoke(info, &host, plugin)
}

fn test_process_note_smoke(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    match input_note_port_count(&plugin) {
        None => TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin does not support note ports extension".to_string()),
        ),
        Some(0) => TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin does not have any input note ports".to_string()),
        ),
        Some(_) => run_audio_smoke(info, &host, plugin),
    }
}

fn test_param_conversions(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    let specs = match collect_params(&plugin) {
        Ok(Some(specs)) => specs,
        Ok(None) => {
            return TestResult::skipped(
                info.name,
                info.description,
                Some("Plugin does not support params extension".to_string()),
            )
        }
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };
    if specs.is_empty() {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin has no parameters".to_string()),
        );
    }

    finish(
        &host,
        TestResult::success(
            info.name,
            info.description,
            Some(format!("Successfully queried {} parameters", specs.len())),
        ),
    )
}

fn test_param_fuzz_basic(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, mut plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    let specs = match collect_params(&plugin) {
        Ok(Some(specs)) => specs,
        Ok(None) => {
            return TestResult::skipped(
                info.name,
                info.description,
                Some("Plugin does not support params extension".to_string()),
            )
        }
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };
    if specs.is_empty() {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin has no parameters".to_string()),
        );
    }
    if FUZZ_PERMUTATIONS == 0 {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("No parameter permutations are configured".to_string()),
        );
    }

    if !plugin.activate(SAMPLE_RATE, BLOCK_SIZE, BLOCK_SIZE) {
        return TestResult::failed(
            info.name,
            info.description,
            Some("clap_plugin::activate() returned false".to_string()),
        );
    }

    let mut rng = rand::thread_rng();
    let empty_events = InputEventList::empty();
    let mut steady_time: i64 = 0;
    {
        let _guard = AudioThreadGuard::new(&host);
        if !plugin.start_processing() {
            return TestResult::failed(
                info.name,
                info.description,
                Some("clap_plugin::start_processing() returned false".to_string()),
            );
        }

        for permutation in 0..FUZZ_PERMUTATIONS {
            let permutation_events = InputEventList::from_param_values(random_param_events(
                &specs,
                CLAP_CORE_EVENT_SPACE_ID,
                CookieMode::FromParamInfo,
                &mut rng,
            ));

            for run in 0..FUZZ_RUNS_PER_PERMUTATION {
                let mut block = AudioBlock::uniform_random(BLOCK_SIZE, &mut rng);
                // The permutation's values are delivered with the first block
                // and held for the remaining runs.
                let events = if run == 0 {
                    &permutation_events
                } else {
                    &empty_events
                };

                let status = process::process_once(&mut plugin, &mut block, events, steady_time);
                steady_time += i64::from(BLOCK_SIZE);

                if status == CLAP_PROCESS_ERROR {
                    return TestResult::failed(
                        info.name,
                        info.description,
                        Some(format!(
                            "clap_plugin::process() returned CLAP_PROCESS_ERROR during \
                             permutation {permutation}, run {run}"
                        )),
                    );
                }
                if let Some(index) = block.first_non_finite_output() {
                    return TestResult::failed(
                        info.name,
                        info.description,
                        Some(format!(
                            "The output contains a non-finite value at sample {index} during \
                             permutation {permutation}, run {run}"
                        )),
                    );
                }
            }
        }

        plugin.stop_processing();
    }
    plugin.deactivate();

    finish(
        &host,
        TestResult::success(
            info.name,
            info.description,
            Some(format!(
                "Processed {} blocks over {FUZZ_PERMUTATIONS} parameter permutations",
                FUZZ_PERMUTATIONS * FUZZ_RUNS_PER_PERMUTATION
            )),
        ),
    )
}

fn test_param_wrong_namespace(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, mut plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    let specs = match collect_params(&plugin) {
        Ok(Some(specs)) => specs,
        Ok(None) => {
            return TestResult::skipped(
                info.name,
                info.description,
                Some("Plugin does not support params extension".to_string()),
            )
        }
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };
    if specs.is_empty() {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin has no parameters".to_string()),
        );
    }

    let baseline = match read_param_values(&plugin, &specs) {
        Ok(values) => values,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    if !plugin.activate(SAMPLE_RATE, BLOCK_SIZE, BLOCK_SIZE) {
        return TestResult::failed(
            info.name,
            info.description,
            Some("clap_plugin::activate() returned false".to_string()),
        );
    }

    let mut rng = rand::thread_rng();
    {
        let _guard = AudioThreadGuard::new(&host);
        if !plugin.start_processing() {
            return TestResult::failed(
                info.name,
                info.description,
                Some("clap_plugin::start_processing() returned false".to_string()),
            );
        }

        let events = InputEventList::from_param_values(random_param_events(
            &specs,
            WRONG_NAMESPACE_SPACE_ID,
            CookieMode::Null,
            &mut rng,
        ));
        let mut block = AudioBlock::ramp(BLOCK_SIZE);
        let status = process::process_once(&mut plugin, &mut block, &events, 0);
        plugin.stop_processing();

        if status == CLAP_PROCESS_ERROR {
            return TestResult::failed(
                info.name,
                info.description,
                Some("clap_plugin::process() returned CLAP_PROCESS_ERROR".to_string()),
            );
        }
    }
    plugin.deactivate();

    let after = match read_param_values(&plugin, &specs) {
        Ok(values) => values,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    for (spec, (before, after)) in specs.iter().zip(baseline.iter().zip(after.iter())) {
        if before.to_bits() != after.to_bits() {
            return TestResult::failed(
                info.name,
                info.description,
                Some(format!(
                    "The value of parameter {} changed from {before} to {after} after \
                     receiving a parameter event with space ID 0x{WRONG_NAMESPACE_SPACE_ID:04X}; \
                     the plugin may not be checking the event's namespace ID",
                    spec.id
                )),
            );
        }
    }

    finish(&host, TestResult::success(info.name, info.description, None))
}

fn test_state_invalid(info: TestCaseInfo, library: &PluginLibrary, plugin_id: &str) -> TestResult {
    let (host, plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    if plugin.state().is_none() {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin does not support state extension".to_string()),
        );
    }

    match load_state(&plugin, InputStream::empty()) {
        Ok(true) => TestResult::failed(
            info.name,
            info.description,
            Some(
                "clap_plugin_state::load() claimed success for a stream that contains no data"
                    .to_string(),
            ),
        ),
        Ok(false) => finish(
            &host,
            TestResult::success(info.name, info.description, None),
        ),
        Err(err) => TestResult::failed(info.name, info.description, Some(err)),
    }
}

fn run_state_reproducibility(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
    cookies: CookieMode,
    apply: ApplyMode,
) -> TestResult {
    let (host, mut plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    if plugin.state().is_none() {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin does not support state extension".to_string()),
        );
    }

    let specs = match collect_params(&plugin) {
        Ok(specs) => specs.unwrap_or_default(),
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    // Move the parameters off their defaults first so the round trip carries
    // real data. Plugins without parameters still get the plain round trip.
    if !specs.is_empty() {
        let mut rng = rand::thread_rng();
        let events = InputEventList::from_param_values(random_param_events(
            &specs,
            CLAP_CORE_EVENT_SPACE_ID,
            cookies,
            &mut rng,
        ));

        match apply {
            ApplyMode::Process => {
                if !plugin.activate(SAMPLE_RATE, BLOCK_SIZE, BLOCK_SIZE) {
                    return TestResult::failed(
                        info.name,
                        info.description,
                        Some("clap_plugin::activate() returned false".to_string()),
                    );
                }
                {
                    let _guard = AudioThreadGuard::new(&host);
                    if !plugin.start_processing() {
                        return TestResult::failed(
                            info.name,
                            info.description,
                            Some("clap_plugin::start_processing() returned false".to_string()),
                        );
                    }

                    let mut block = AudioBlock::ramp(BLOCK_SIZE);
                    let status = process::process_once(&mut plugin, &mut block, &events, 0);
                    plugin.stop_processing();

                    if status == CLAP_PROCESS_ERROR {
                        return TestResult::failed(
                            info.name,
                            info.description,
                            Some(
                                "clap_plugin::process() returned CLAP_PROCESS_ERROR while \
                                 applying parameter values"
                                    .to_string(),
                            ),
                        );
                    }
                }
                plugin.deactivate();
            }
            ApplyMode::Flush => {
                // While the plugin is inactive, flush() takes over the role
                // of process() for delivering parameter events and is a
                // main-thread function.
                let Some(params) = plugin.params() else {
                    return TestResult::failed(
                        info.name,
                        info.description,
                        Some("Plugin does not support params extension".to_string()),
                    );
                };
                let Some(flush) = params.flush else {
                    return TestResult::failed(
                        info.name,
                        info.description,
                        Some("clap_plugin_params::flush is a null pointer".to_string()),
                    );
                };

                let sink = OutputEventSink::new();
                unsafe { flush(plugin.as_raw(), events.as_raw(), sink.as_raw()) };
            }
        }
    }

    let first_state = match save_state(&plugin) {
        Ok(state) => state,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    // A fresh instance with its own host has to reproduce the state exactly.
    let (fresh_host, fresh_plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    match load_state(&fresh_plugin, InputStream::new(first_state.clone())) {
        Ok(true) => {}
        Ok(false) => {
            return TestResult::failed(
                info.name,
                info.description,
                Some("clap_plugin_state::load() returned false for freshly saved state".to_string()),
            )
        }
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    }

    let second_state = match save_state(&fresh_plugin) {
        Ok(state) => state,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    if first_state != second_state {
        return TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "The state saved after a load round trip does not match the original state \
                 ({} vs {} bytes)",
                first_state.len(),
                second_state.len()
            )),
        );
    }

    let result = TestResult::success(
        info.name,
        info.description,
        Some(format!(
            "Round-tripped {} bytes of state",
            first_state.len()
        )),
    );
    finish(&host, finish(&fresh_host, result))
}

fn test_state_buffered_streams(
    info: TestCaseInfo,
    library: &PluginLibrary,
    plugin_id: &str,
) -> TestResult {
    let (host, plugin) = match create_initialized(library, plugin_id) {
        Ok(created) => created,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    if plugin.state().is_none() {
        return TestResult::skipped(
            info.name,
            info.description,
            Some("Plugin does not support state extension".to_string()),
        );
    }

    let state = match save_state(&plugin) {
        Ok(state) => state,
        Err(err) => return TestResult::failed(info.name, info.description, Some(err)),
    };

    match load_state(&plugin, InputStream::chunked(state)) {
        Ok(true) => finish(
            &host,
            TestResult::success(
                info.name,
                info.description,
                Some(format!(
                    "State was reloaded through a stream limited to {} bytes per read",
                    crate::stream::CHUNKED_READ_LIMIT
                )),
            ),
        ),
        Ok(false) => TestResult::failed(
            info.name,
            info.description,
            Some(format!(
                "clap_plugin_state::load() returned false when reads were limited to {} bytes \
                 at a time",
                crate::stream::CHUNKED_READ_LIMIT
            )),
        ),
        Err(err) => TestResult::failed(info.name, info.description, Some(err)),
    }
}
