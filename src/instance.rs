//! A single created plugin and its activation/processing lifecycle.

use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use std::sync::Arc;

use clap_sys::ext::note_ports::{clap_plugin_note_ports, CLAP_EXT_NOTE_PORTS};
use clap_sys::ext::params::{clap_plugin_params, CLAP_EXT_PARAMS};
use clap_sys::ext::state::{clap_plugin_state, CLAP_EXT_STATE};
use clap_sys::plugin_factory::clap_plugin_factory;
use clap_sys::plugin::{clap_plugin, clap_plugin_descriptor};
use clap_sys::process::{clap_process, clap_process_status, CLAP_PROCESS_ERROR};

use crate::error::{Result, ValidatorError};
use crate::host::Host;

/// Plugin status in terms of activation and processing.
///
/// The legal transitions are `Inactive` -> `ActiveAndSleeping` <->
/// `ActiveAndProcessing`, with deactivation always passing back through
/// `ActiveAndSleeping`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginStatus {
    Inactive,
    ActiveAndSleeping,
    ActiveAndProcessing,
}

/// A CLAP plugin instance created from a library's plugin factory.
///
/// The instance shares ownership of its [`Host`] and tears the plugin down in
/// order on drop: stop processing, deactivate, destroy, detach from the host.
pub struct PluginInstance {
    plugin: *const clap_plugin,
    host: Arc<Host>,
    plugin_id: String,
    initialized: bool,
    status: PluginStatus,
}

// Lifecycle calls all happen on the validator's main thread; the raw plugin
// pointer never crosses threads without the audio-thread guard protocol.
unsafe impl Send for PluginInstance {}

impl PluginInstance {
    /// Creates a plugin instance through the factory. A null return from
    /// `create_plugin` is an error, not a crash.
    pub fn create(
        factory: &clap_plugin_factory,
        plugin_id: &str,
        host: Arc<Host>,
    ) -> Result<Self> {
        let id_cstring = CString::new(plugin_id)
            .map_err(|_| ValidatorError::InvalidCString(plugin_id.to_string()))?;

        let plugin = unsafe {
            match factory.create_plugin {
                Some(create_plugin) => create_plugin(factory, host.as_raw(), id_cstring.as_ptr()),
                None => std::ptr::null(),
            }
        };
        if plugin.is_null() {
            return Err(ValidatorError::CreatePluginFailed(plugin_id.to_string()));
        }

        host.set_current_plugin(plugin);

        Ok(Self {
            plugin,
            host,
            plugin_id: plugin_id.to_string(),
            initialized: false,
            status: PluginStatus::Inactive,
        })
    }

    /// Initializes the plugin. Idempotent; required before `activate()`.
    pub fn init(&mut self) -> bool {
        if self.initialized {
            return true;
        }

        let initialized = unsafe {
            match (*self.plugin).init {
                Some(init) => init(self.plugin),
                None => false,
            }
        };
        self.initialized = initialized;
        initialized
    }

    /// Activates the plugin for processing. Only legal for an initialized,
    /// inactive plugin; the status is left unchanged on failure.
    pub fn activate(&mut self, sample_rate: f64, min_frames: u32, max_frames: u32) -> bool {
        if !self.initialized || self.status != PluginStatus::Inactive {
            return false;
        }

        let activated = unsafe {
            match (*self.plugin).activate {
                Some(activate) => activate(self.plugin, sample_rate, min_frames, max_frames),
                None => false,
            }
        };
        if activated {
            self.status = PluginStatus::ActiveAndSleeping;
        }
        activated
    }

    /// Deactivates the plugin, stopping processing first when needed.
    pub fn deactivate(&mut self) {
        if self.status == PluginStatus::ActiveAndProcessing {
            self.stop_processing();
        }
        if self.status != PluginStatus::ActiveAndSleeping {
            return;
        }

        unsafe {
            if let Some(deactivate) = (*self.plugin).deactivate {
                deactivate(self.plugin);
            }
        }
        self.status = PluginStatus::Inactive;
    }

    /// Starts processing. `start_processing` is optional on the plugin side;
    /// when absent the transition succeeds immediately.
    pub fn start_processing(&mut self) -> bool {
        if self.status != PluginStatus::ActiveAndSleeping {
            return false;
        }

        let started = unsafe {
            match (*self.plugin).start_processing {
                Some(start_processing) => start_processing(self.plugin),
                None => true,
            }
        };
        if started {
            self.status = PluginStatus::ActiveAndProcessing;
        }
        started
    }

    pub fn stop_processing(&mut self) {
        if self.status != PluginStatus::ActiveAndProcessing {
            return;
        }

        unsafe {
            if let Some(stop_processing) = (*self.plugin).stop_processing {
                stop_processing(self.plugin);
            }
        }
        self.status = PluginStatus::ActiveAndSleeping;
    }

    /// Runs one processing call. Returns `CLAP_PROCESS_ERROR` without calling
    /// the plugin when it is not in the processing state.
    pub fn process(&mut self, process_data: &clap_process) -> clap_process_status {
        if self.status != PluginStatus::ActiveAndProcessing {
            return CLAP_PROCESS_ERROR;
        }

        unsafe {
            match (*self.plugin).process {
                Some(process) => process(self.plugin, process_data),
                None => CLAP_PROCESS_ERROR,
            }
        }
    }

    /// The descriptor stored on the `clap_plugin` object itself.
    pub fn descriptor(&self) -> Option<&clap_plugin_descriptor> {
        unsafe { (*self.plugin).desc.as_ref() }
    }

    /// Queries an extension from the plugin.
    pub fn get_extension(&self, extension_id: &CStr) -> *const c_void {
        unsafe {
            match (*self.plugin).get_extension {
                Some(get_extension) => get_extension(self.plugin, extension_id.as_ptr()),
                None => std::ptr::null(),
            }
        }
    }

    pub fn params(&self) -> Option<&clap_plugin_params> {
        unsafe { (self.get_extension(CLAP_EXT_PARAMS) as *const clap_plugin_params).as_ref() }
    }

    pub fn state(&self) -> Option<&clap_plugin_state> {
        unsafe { (self.get_extension(CLAP_EXT_STATE) as *const clap_plugin_state).as_ref() }
    }

    pub fn note_ports(&self) -> Option<&clap_plugin_note_ports> {
        unsafe {
            (self.get_extension(CLAP_EXT_NOTE_PORTS) as *const clap_plugin_note_ports).as_ref()
        }
    }

    /// The raw plugin pointer for extension calls.
    pub fn as_raw(&self) -> *const clap_plugin {
        self.plugin
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if self.status == PluginStatus::ActiveAndProcessing {
            self.stop_processing();
        }
        if self.status == PluginStatus::ActiveAndSleeping {
            self.deactivate();
        }

        if self.initialized {
            unsafe {
                if let Some(destroy) = (*self.plugin).destroy {
                    destroy(self.plugin);
                }
            }
        }

        self.host.clear_current_plugin();
    }
}
