//! Loading CLAP plugin libraries and reading their factory metadata.

use std::collections::HashSet;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap_sys::entry::clap_plugin_entry;
use clap_sys::plugin_factory::{clap_plugin_factory, CLAP_PLUGIN_FACTORY_ID};
use clap_sys::plugin::clap_plugin_descriptor;
use libloading::Library;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, ValidatorError};
use crate::host::Host;
use crate::instance::PluginInstance;
use crate::util;

/// Metadata for a single plugin within a CLAP plugin library, converted from
/// the factory's `clap_plugin_descriptor`. Empty C strings map to `None`.
#[derive(Clone, Debug, Serialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub vendor: Option<String>,
    pub description: Option<String>,
    pub manual_url: Option<String>,
    pub support_url: Option<String>,
    pub features: Vec<String>,
}

impl PluginMetadata {
    /// # Safety
    ///
    /// `descriptor` must point to a valid descriptor whose strings stay alive
    /// for the duration of the call.
    pub unsafe fn from_descriptor(descriptor: &clap_plugin_descriptor) -> Result<Self> {
        Ok(Self {
            id: util::cstr_to_string(descriptor.id, "id")?,
            name: util::cstr_to_string(descriptor.name, "name")?,
            version: util::cstr_to_optional_string(descriptor.version),
            vendor: util::cstr_to_optional_string(descriptor.vendor),
            description: util::cstr_to_optional_string(descriptor.description),
            manual_url: util::cstr_to_optional_string(descriptor.manual_url),
            support_url: util::cstr_to_optional_string(descriptor.support_url),
            features: util::cstr_array_to_vec(descriptor.features),
        })
    }
}

/// Metadata for a CLAP plugin library, which may contain multiple plugins.
#[derive(Clone, Debug)]
pub struct LibraryMetadata {
    /// The CLAP version declared by the library's entry point as
    /// (major, minor, revision).
    pub clap_version: (u32, u32, u32),
    pub plugins: Vec<PluginMetadata>,
}

impl LibraryMetadata {
    /// Whether the declared ABI version can be validated at all.
    pub fn is_clap_version_compatible(&self) -> bool {
        util::is_version_compatible(clap_sys::version::clap_version {
            major: self.clap_version.0,
            minor: self.clap_version.1,
            revision: self.clap_version.2,
        })
    }
}

/// A CLAP plugin library built from a loaded module's `clap_entry`.
///
/// The library must outlive every [`PluginInstance`] created from it. On drop
/// the entry point's `deinit()` runs before the module handle is released.
#[derive(Debug)]
pub struct PluginLibrary {
    path: PathBuf,
    entry: *const clap_plugin_entry,
    /// `Some` until drop; taken there so the handle closes after `deinit()`.
    library: Option<Library>,
}

// The entry pointer refers into the loaded module, which lives as long as the
// `Library` handle held alongside it.
unsafe impl Send for PluginLibrary {}
unsafe impl Sync for PluginLibrary {}

impl PluginLibrary {
    /// Loads a CLAP plugin from a path to a `.clap` file or bundle.
    pub fn load(path: &Path) -> Result<Self> {
        let absolute_path = std::path::absolute(path)?;
        let module_path = module_path_for(&absolute_path)?;

        debug!(path = %absolute_path.display(), "loading plugin library");
        let library = open_module(&module_path).map_err(|err| ValidatorError::LibraryOpen {
            path: module_path.clone(),
            reason: err.to_string(),
        })?;

        let entry: *const clap_plugin_entry = unsafe {
            match library.get::<*const clap_plugin_entry>(b"clap_entry\0") {
                Ok(symbol) => *symbol,
                Err(_) => return Err(ValidatorError::MissingEntry(module_path)),
            }
        };
        if entry.is_null() {
            return Err(ValidatorError::MissingEntry(module_path));
        }

        // The entry point wants the path it was loaded from.
        let path_cstring = CString::new(absolute_path.to_string_lossy().as_bytes())
            .map_err(|_| ValidatorError::InvalidCString(absolute_path.display().to_string()))?;
        let initialized = unsafe {
            match (*entry).init {
                Some(init) => init(path_cstring.as_ptr()),
                None => false,
            }
        };
        if !initialized {
            // Dropping `library` here releases the module handle.
            return Err(ValidatorError::EntryInitFailed(absolute_path));
        }

        Ok(Self {
            path: absolute_path,
            entry,
            library: Some(library),
        })
    }

    /// The absolute path this library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the metadata for all plugins stored in this library. Duplicate
    /// plugin IDs and null descriptors are contract violations.
    pub fn metadata(&self) -> Result<LibraryMetadata> {
        let factory = self.plugin_factory()?;

        let clap_version = unsafe {
            let version = (*self.entry).clap_version;
            (version.major, version.minor, version.revision)
        };

        let plugin_count = unsafe {
            match factory.get_plugin_count {
                Some(get_plugin_count) => get_plugin_count(factory),
                None => 0,
            }
        };

        let mut plugins = Vec::with_capacity(plugin_count as usize);
        let mut seen_ids = HashSet::new();
        for index in 0..plugin_count {
            let descriptor = unsafe {
                let descriptor = match factory.get_plugin_descriptor {
                    Some(get_plugin_descriptor) => get_plugin_descriptor(factory, index),
                    None => std::ptr::null(),
                };
                match descriptor.as_ref() {
                    Some(descriptor) => descriptor,
                    None => return Err(ValidatorError::NullDescriptor(index)),
                }
            };

            let metadata = unsafe { PluginMetadata::from_descriptor(descriptor)? };
            if !seen_ids.insert(metadata.id.clone()) {
                return Err(ValidatorError::DuplicatePluginId(metadata.id));
            }
            plugins.push(metadata);
        }

        Ok(LibraryMetadata {
            clap_version,
            plugins,
        })
    }

    /// Returns whether the entry point exposes a factory with the given ID.
    pub fn factory_exists(&self, factory_id: &str) -> bool {
        let Ok(factory_id) = CString::new(factory_id) else {
            return false;
        };
        unsafe {
            match (*self.entry).get_factory {
                Some(get_factory) => !get_factory(factory_id.as_ptr()).is_null(),
                None => false,
            }
        }
    }

    /// The plugin factory, for enumerating descriptors and creating plugins.
    pub fn plugin_factory(&self) -> Result<&clap_plugin_factory> {
        unsafe {
            let factory = match (*self.entry).get_factory {
                Some(get_factory) => {
                    get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr()) as *const clap_plugin_factory
                }
                None => std::ptr::null(),
            };
            factory.as_ref().ok_or(ValidatorError::MissingPluginFactory)
        }
    }

    /// Tries to create the plugin with the given ID.
    pub fn create_plugin(&self, id: &str, host: Arc<Host>) -> Result<PluginInstance> {
        let factory = self.plugin_factory()?;
        PluginInstance::create(factory, id, host)
    }
}

impl Drop for PluginLibrary {
    fn drop(&mut self) {
        unsafe {
            if let Some(deinit) = (*self.entry).deinit {
                deinit();
            }
        }
        // Release the module handle only after deinit has run.
        drop(self.library.take());
    }
}

/// Resolves the dynamic library to open for a plugin path. On macOS `.clap`
/// plugins are bundles and the executable lives inside them.
#[cfg(target_os = "macos")]
pub(crate) fn module_path_for(absolute_path: &Path) -> Result<PathBuf> {
    if absolute_path.extension().map_or(true, |ext| ext != "clap")
        || !absolute_path.is_dir()
    {
        return Ok(absolute_path.to_path_buf());
    }

    let binary_dir = absolute_path.join("Contents").join("MacOS");
    if !binary_dir.is_dir() {
        return Err(ValidatorError::BundleOpen(absolute_path.to_path_buf()));
    }

    // Prefer the executable named after the bundle, matching the common
    // bundle layout, and fall back to the only file present.
    if let Some(stem) = absolute_path.file_stem() {
        let candidate = binary_dir.join(stem);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    std::fs::read_dir(&binary_dir)
        .map_err(|_| ValidatorError::BundleOpen(absolute_path.to_path_buf()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| path.is_file())
        .ok_or_else(|| ValidatorError::BundleExecutable(absolute_path.to_path_buf()))
}

#[cfg(not(target_os = "macos"))]
pub(crate) fn module_path_for(absolute_path: &Path) -> Result<PathBuf> {
    Ok(absolute_path.to_path_buf())
}

/// Opens the module with local symbol scope and lazy binding, matching how
/// hosts load plugins in practice.
#[cfg(unix)]
fn open_module(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL};

    unsafe { UnixLibrary::open(Some(path), RTLD_LOCAL | RTLD_LAZY).map(Library::from) }
}

#[cfg(windows)]
fn open_module(path: &Path) -> std::result::Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_fails() {
        let result = PluginLibrary::load(Path::new("/does/not/exist.clap"));
        assert!(matches!(result, Err(ValidatorError::LibraryOpen { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_non_clap_library_reports_missing_entry() {
        // libc is guaranteed to be loadable and is certainly not a CLAP
        // plugin.
        let candidates = [
            "/usr/lib/x86_64-linux-gnu/libm.so.6",
            "/usr/lib/libm.so.6",
            "/lib/x86_64-linux-gnu/libm.so.6",
        ];
        let Some(library) = candidates.iter().map(Path::new).find(|path| path.exists()) else {
            return;
        };

        match PluginLibrary::load(library) {
            Err(ValidatorError::MissingEntry(path)) => {
                assert!(path.to_string_lossy().contains("libm"))
            }
            other => panic!("expected a missing clap_entry error, got {other:?}"),
        }
    }

    #[test]
    fn test_library_metadata_version_compatibility() {
        let compatible = LibraryMetadata {
            clap_version: (1, 1, 7),
            plugins: Vec::new(),
        };
        let incompatible = LibraryMetadata {
            clap_version: (0, 26, 0),
            plugins: Vec::new(),
        };
        assert!(compatible.is_clap_version_compatible());
        assert!(!incompatible.is_clap_version_compatible());
    }
}
