//! Finding installed CLAP plugins in the standard per-platform directories.

use std::path::{Path, PathBuf};

use tracing::warn;

/// The standard CLAP plugin directories for the current platform. Paths that
/// do not exist are returned as-is; callers skip them while scanning.
pub fn plugin_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(home).join("Library/Audio/Plug-Ins/CLAP"));
        }
        paths.push(PathBuf::from("/Library/Audio/Plug-Ins/CLAP"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(local_app_data).join("Programs/Common/CLAP"));
        }
        if let Ok(common_program_files) = std::env::var("COMMONPROGRAMFILES") {
            paths.push(PathBuf::from(common_program_files).join("CLAP"));
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(home).join(".clap"));
        }
        paths.push(PathBuf::from("/usr/lib/clap"));
    }

    paths
}

/// Recursively collects all `.clap` entries under the given search paths. On
/// macOS plugins are bundle directories, elsewhere plain files, so both kinds
/// are accepted; bundles are not descended into.
pub fn find_plugins(search_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut plugins = Vec::new();
    for search_path in search_paths {
        if search_path.exists() {
            collect_plugins(search_path, &mut plugins);
        }
    }

    plugins.sort();
    plugins
}

fn collect_plugins(directory: &Path, plugins: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(directory = %directory.display(), %err, "could not scan directory");
            return;
        }
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.extension().is_some_and(|extension| extension == "clap") {
            plugins.push(path);
        } else if path.is_dir() {
            collect_plugins(&path, plugins);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_paths_are_platform_shaped() {
        let paths = plugin_search_paths();
        assert!(!paths.is_empty());
        for path in &paths {
            assert!(path.to_string_lossy().to_lowercase().contains("clap"));
        }
    }

    #[test]
    fn test_find_plugins_in_nested_directories() {
        let root = crate::util::validator_temp_dir().join("discovery-test");
        let nested = root.join("vendor/sub");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("top.clap"), b"").unwrap();
        std::fs::write(nested.join("deep.clap"), b"").unwrap();
        std::fs::write(nested.join("ignored.so"), b"").unwrap();

        let plugins = find_plugins(&[root.clone()]);
        let names: Vec<_> = plugins
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"top.clap".to_string()));
        assert!(names.contains(&"deep.clap".to_string()));
        assert!(!names.contains(&"ignored.so".to_string()));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_search_path_is_skipped() {
        let plugins = find_plugins(&[PathBuf::from("/does/not/exist/anywhere")]);
        assert!(plugins.is_empty());
    }
}
