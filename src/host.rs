//! The host side of the CLAP ABI.
//!
//! Every plugin instance gets its own [`Host`]. The plugin keeps the
//! `clap_host` pointer for its entire life, so the host is reference counted
//! and its address never moves. Callbacks arriving from the plugin are
//! checked against the ABI's threading rules; the first violation is recorded
//! and surfaced to the test harness instead of being raised across the C
//! boundary.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use clap_sys::ext::params::{clap_host_params, clap_param_clear_flags, clap_param_rescan_flags, CLAP_EXT_PARAMS};
use clap_sys::ext::state::{clap_host_state, CLAP_EXT_STATE};
use clap_sys::ext::thread_check::{clap_host_thread_check, CLAP_EXT_THREAD_CHECK};
use clap_sys::host::clap_host;
use clap_sys::id::clap_id;
use clap_sys::plugin::clap_plugin;
use clap_sys::version::CLAP_VERSION;
use parking_lot::Mutex;

/// An abstraction for a CLAP plugin host used for validation.
pub struct Host {
    raw: clap_host,

    /// The thread the host was created on. Lifecycle calls and main-thread
    /// host callbacks must happen here.
    main_thread_id: ThreadId,
    /// Set while an [`AudioThreadGuard`] is alive.
    audio_thread_id: Mutex<Option<ThreadId>>,

    /// The first thread-discipline violation observed through a callback.
    /// Later violations are dropped so the report points at the root cause.
    callback_error: Mutex<Option<String>>,

    /// The plugin currently associated with this host. Non-owning; set by the
    /// instance on construction and cleared in its drop.
    current_plugin: Mutex<Option<*const clap_plugin>>,

    requested_restart: AtomicBool,
    requested_callback: AtomicBool,
}

// The raw clap_host contains C pointers, but all mutable state behind them is
// guarded by the mutexes and atomics above.
unsafe impl Send for Host {}
unsafe impl Sync for Host {}

impl Host {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            raw: clap_host {
                clap_version: CLAP_VERSION,
                host_data: weak.as_ptr() as *mut c_void,
                name: c"clap-validator".as_ptr(),
                vendor: c"CLAP".as_ptr(),
                url: c"https://github.com/free-audio/clap".as_ptr(),
                version: c"1.0.0".as_ptr(),
                get_extension: Some(host_get_extension),
                request_restart: Some(host_request_restart),
                request_process: Some(host_request_process),
                request_callback: Some(host_request_callback),
            },
            main_thread_id: thread::current().id(),
            audio_thread_id: Mutex::new(None),
            callback_error: Mutex::new(None),
            current_plugin: Mutex::new(None),
            requested_restart: AtomicBool::new(false),
            requested_callback: AtomicBool::new(false),
        })
    }

    /// The `clap_host` struct to pass to plugins. The pointer stays valid as
    /// long as this host is alive.
    pub fn as_raw(&self) -> *const clap_host {
        &self.raw
    }

    pub fn set_current_plugin(&self, plugin: *const clap_plugin) {
        *self.current_plugin.lock() = Some(plugin);
    }

    pub fn clear_current_plugin(&self) {
        *self.current_plugin.lock() = None;
    }

    /// The first thread-discipline violation reported by a callback, if any.
    pub fn callback_error(&self) -> Option<String> {
        self.callback_error.lock().clone()
    }

    pub fn clear_callback_error(&self) {
        *self.callback_error.lock() = None;
    }

    fn set_callback_error(&self, error: String) {
        let mut slot = self.callback_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread_id
    }

    pub fn is_audio_thread(&self) -> bool {
        *self.audio_thread_id.lock() == Some(thread::current().id())
    }

    fn set_audio_thread(&self, thread_id: ThreadId) {
        *self.audio_thread_id.lock() = Some(thread_id);
    }

    fn clear_audio_thread(&self) {
        *self.audio_thread_id.lock() = None;
    }

    fn assert_main_thread(&self, function_name: &str) {
        if !self.is_main_thread() {
            self.set_callback_error(format!(
                "{function_name} must be called from the main thread"
            ));
        }
    }

    fn assert_not_audio_thread(&self, function_name: &str) {
        if self.is_audio_thread() {
            self.set_callback_error(format!(
                "{function_name} must not be called from the audio thread"
            ));
        }
    }

    pub fn has_requested_restart(&self) -> bool {
        self.requested_restart.load(Ordering::SeqCst)
    }

    pub fn clear_requested_restart(&self) {
        self.requested_restart.store(false, Ordering::SeqCst);
    }

    pub fn has_requested_callback(&self) -> bool {
        self.requested_callback.load(Ordering::SeqCst)
    }

    pub fn clear_requested_callback(&self) {
        self.requested_callback.store(false, Ordering::SeqCst);
    }

    /// Drains a pending `request_callback`.
    pub fn handle_callbacks_once(&self) {
        if self.requested_callback.swap(false, Ordering::SeqCst) {
            // TODO: dispatch clap_plugin::on_main_thread to the plugin in
            // current_plugin; the dispatch is not wired up yet.
        }
    }
}

/// Recovers the host object from the context pointer embedded in `clap_host`.
unsafe fn from_clap_host<'a>(host: *const clap_host) -> Option<&'a Host> {
    let host = host.as_ref()?;
    (host.host_data as *const Host).as_ref()
}

static HOST_THREAD_CHECK: clap_host_thread_check = clap_host_thread_check {
    is_main_thread: Some(ext_is_main_thread),
    is_audio_thread: Some(ext_is_audio_thread),
};

static HOST_PARAMS: clap_host_params = clap_host_params {
    rescan: Some(ext_params_rescan),
    clear: Some(ext_params_clear),
    request_flush: Some(ext_params_request_flush),
};

static HOST_STATE: clap_host_state = clap_host_state {
    mark_dirty: Some(ext_state_mark_dirty),
};

unsafe extern "C" fn host_get_extension(
    host: *const clap_host,
    extension_id: *const c_char,
) -> *const c_void {
    if from_clap_host(host).is_none() || extension_id.is_null() {
        return ptr::null();
    }

    let extension_id = CStr::from_ptr(extension_id);
    if extension_id == CLAP_EXT_THREAD_CHECK {
        &HOST_THREAD_CHECK as *const clap_host_thread_check as *const c_void
    } else if extension_id == CLAP_EXT_PARAMS {
        &HOST_PARAMS as *const clap_host_params as *const c_void
    } else if extension_id == CLAP_EXT_STATE {
        &HOST_STATE as *const clap_host_state as *const c_void
    } else {
        ptr::null()
    }
}

unsafe extern "C" fn host_request_restart(host: *const clap_host) {
    if let Some(host) = from_clap_host(host) {
        host.requested_restart.store(true, Ordering::SeqCst);
    }
}

unsafe extern "C" fn host_request_process(_host: *const clap_host) {
    // The validator drives processing itself.
}

unsafe extern "C" fn host_request_callback(host: *const clap_host) {
    if let Some(host) = from_clap_host(host) {
        host.requested_callback.store(true, Ordering::SeqCst);
    }
}

unsafe extern "C" fn ext_is_main_thread(host: *const clap_host) -> bool {
    from_clap_host(host).is_some_and(|host| host.is_main_thread())
}

unsafe extern "C" fn ext_is_audio_thread(host: *const clap_host) -> bool {
    from_clap_host(host).is_some_and(|host| host.is_audio_thread())
}

unsafe extern "C" fn ext_params_rescan(host: *const clap_host, _flags: clap_param_rescan_flags) {
    if let Some(host) = from_clap_host(host) {
        host.assert_main_thread("clap_host_params::rescan()");
    }
}

unsafe extern "C" fn ext_params_clear(
    host: *const clap_host,
    _param_id: clap_id,
    _flags: clap_param_clear_flags,
) {
    if let Some(host) = from_clap_host(host) {
        host.assert_main_thread("clap_host_params::clear()");
    }
}

unsafe extern "C" fn ext_params_request_flush(host: *const clap_host) {
    if let Some(host) = from_clap_host(host) {
        host.assert_not_audio_thread("clap_host_params::request_flush()");
    }
}

unsafe extern "C" fn ext_state_mark_dirty(host: *const clap_host) {
    if let Some(host) = from_clap_host(host) {
        host.assert_main_thread("clap_host_state::mark_dirty()");
    }
}

/// Marks the current thread as the host's audio thread for a lexical scope.
///
/// ```ignore
/// {
///     let _guard = AudioThreadGuard::new(&host);
///     plugin.start_processing();
///     plugin.process(&process_data);
///     plugin.stop_processing();
/// }
/// ```
///
/// The audio-thread role is additive: inside the guard the thread still
/// counts as the main thread. Guards must not be nested.
pub struct AudioThreadGuard<'a> {
    host: &'a Host,
}

impl<'a> AudioThreadGuard<'a> {
    pub fn new(host: &'a Host) -> Self {
        host.set_audio_thread(thread::current().id());
        Self { host }
    }
}

impl Drop for AudioThreadGuard<'_> {
    fn drop(&mut self) {
        self.host.clear_audio_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_thread_identity() {
        let host = Host::new();
        assert!(host.is_main_thread());
        assert!(!host.is_audio_thread());

        let host_for_thread = Arc::clone(&host);
        let observed_on_other_thread = thread::spawn(move || host_for_thread.is_main_thread())
            .join()
            .unwrap();
        assert!(!observed_on_other_thread);
    }

    #[test]
    fn test_audio_thread_guard_is_scoped_and_additive() {
        let host = Host::new();
        {
            let _guard = AudioThreadGuard::new(&host);
            assert!(host.is_audio_thread());
            assert!(host.is_main_thread());
        }
        assert!(!host.is_audio_thread());
    }

    #[test]
    fn test_audio_thread_is_per_thread() {
        let host = Host::new();
        let _guard = AudioThreadGuard::new(&host);

        let host_for_thread = Arc::clone(&host);
        let observed_on_other_thread = thread::spawn(move || host_for_thread.is_audio_thread())
            .join()
            .unwrap();
        assert!(!observed_on_other_thread);
    }

    #[test]
    fn test_first_callback_error_is_retained() {
        let host = Host::new();
        host.set_callback_error("first".to_string());
        host.set_callback_error("second".to_string());
        assert_eq!(host.callback_error().as_deref(), Some("first"));

        host.clear_callback_error();
        assert_eq!(host.callback_error(), None);
        host.set_callback_error("third".to_string());
        assert_eq!(host.callback_error().as_deref(), Some("third"));
    }

    #[test]
    fn test_main_thread_assertions_through_trampolines() {
        let host = Host::new();
        let raw = host.as_raw();

        // Calling from the main thread is fine.
        unsafe { ext_params_rescan(raw, 0) };
        assert_eq!(host.callback_error(), None);

        // request_flush from inside an audio-thread scope is a violation.
        {
            let _guard = AudioThreadGuard::new(&host);
            unsafe { ext_params_request_flush(raw) };
        }
        let error = host.callback_error().unwrap();
        assert!(error.contains("request_flush"));
        assert!(error.contains("must not be called from the audio thread"));
    }

    #[test]
    fn test_rescan_off_main_thread_is_recorded() {
        let host = Host::new();
        let host_for_thread = Arc::clone(&host);
        thread::spawn(move || unsafe { ext_params_rescan(host_for_thread.as_raw(), 0) })
            .join()
            .unwrap();

        let error = host.callback_error().unwrap();
        assert!(error.contains("rescan"));
        assert!(error.contains("must be called from the main thread"));
    }

    #[test]
    fn test_request_flags() {
        let host = Host::new();
        assert!(!host.has_requested_restart());
        assert!(!host.has_requested_callback());

        unsafe {
            host_request_restart(host.as_raw());
            host_request_callback(host.as_raw());
            // request_process does not set any flag.
            host_request_process(host.as_raw());
        }
        assert!(host.has_requested_restart());
        assert!(host.has_requested_callback());

        host.clear_requested_restart();
        host.handle_callbacks_once();
        assert!(!host.has_requested_restart());
        assert!(!host.has_requested_callback());
    }

    #[test]
    fn test_get_extension_lookup() {
        let host = Host::new();
        let raw = host.as_raw();

        unsafe {
            assert!(!host_get_extension(raw, CLAP_EXT_THREAD_CHECK.as_ptr()).is_null());
            assert!(!host_get_extension(raw, CLAP_EXT_PARAMS.as_ptr()).is_null());
            assert!(!host_get_extension(raw, CLAP_EXT_STATE.as_ptr()).is_null());
            assert!(host_get_extension(raw, c"clap.not-an-extension".as_ptr()).is_null());
            assert!(host_get_extension(raw, ptr::null()).is_null());
        }
    }
}
