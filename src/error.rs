//! Error types for the validator library.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Could not load plugin library: {path}\n  Reason: {reason}")]
    LibraryOpen { path: PathBuf, reason: String },

    #[error("The library does not expose a 'clap_entry' symbol: {0}")]
    MissingEntry(PathBuf),

    #[error("clap_plugin_entry::init() returned false for: {0}")]
    EntryInitFailed(PathBuf),

    #[error("Could not open bundle: {0}")]
    BundleOpen(PathBuf),

    #[error("Could not get executable URL within bundle: {0}")]
    BundleExecutable(PathBuf),

    #[error("The plugin does not support the plugin factory")]
    MissingPluginFactory,

    #[error("The plugin returned a null plugin descriptor for plugin index {0}")]
    NullDescriptor(u32),

    #[error("The plugin's factory contains multiple entries for the same plugin ID: {0}")]
    DuplicatePluginId(String),

    #[error("The plugin factory did not create a plugin instance for ID: {0}")]
    CreatePluginFailed(String),

    #[error("The plugin descriptor's '{0}' field is a null pointer")]
    NullDescriptorField(&'static str),

    #[error("String contains an interior null byte: {0}")]
    InvalidCString(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ValidatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = ValidatorError::MissingEntry(PathBuf::from("/tmp/not-a-plugin.so"));
        assert!(err.to_string().contains("clap_entry"));
        assert!(err.to_string().contains("/tmp/not-a-plugin.so"));

        let err = ValidatorError::DuplicatePluginId("com.example.gain".to_string());
        assert!(err.to_string().contains("multiple entries"));
        assert!(err.to_string().contains("com.example.gain"));
    }

    #[test]
    fn test_library_open_includes_reason() {
        let err = ValidatorError::LibraryOpen {
            path: PathBuf::from("/tmp/broken.clap"),
            reason: "file not found".to_string(),
        };
        assert!(err.to_string().contains("/tmp/broken.clap"));
        assert!(err.to_string().contains("file not found"));
    }
}
