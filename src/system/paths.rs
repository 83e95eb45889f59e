// src/system/paths.rs

//! Path expansion and executable lookup on the search path.

use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    /// Extra directories searched before `PATH` (the "libraries" sources).
    static ref EXTRA_SEARCH_PATHS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
    /// Memo of Python module lookups; spawning an interpreter per check is slow.
    static ref PYTHON_LOOKUPS: Mutex<HashMap<String, bool>> = Mutex::new(HashMap::new());
}

/// Failures resolving user-supplied paths.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not expand path '{path}': {reason}")]
    Expansion { path: String, reason: String },
    #[error("Could not resolve the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("Could not find the user's home directory.")]
    HomeNotFound,
}

/// Returns the user's home directory.
pub fn home_dir() -> Result<PathBuf, PathError> {
    dirs::home_dir().ok_or(PathError::HomeNotFound)
}

/// Expands `~` and environment variables in `raw` and makes the result absolute.
///
/// # Errors
/// Returns an error if a referenced environment variable does not exist or if
/// the current directory cannot be resolved for a relative path.
pub fn expand_path(raw: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(raw).map_err(|e| PathError::Expansion {
        path: raw.to_string(),
        reason: e.to_string(),
    })?;
    let path = PathBuf::from(expanded.into_owned());
    absolutize(&path)
}

/// Joins a relative path onto the current directory; absolute paths are kept.
pub fn absolutize(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = std::path::absolute(path).map_err(PathError::CurrentDir)?;
    Ok(dunce::simplified(&absolute).to_path_buf())
}

/// Normalizes a source path for identity comparisons.
pub fn normalize(path: &Path) -> PathBuf {
    dunce::canonicalize(path)
        .ok()
        .or_else(|| absolutize(path).ok())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Registers directories searched before `PATH` when resolving executables.
pub fn add_search_paths<I>(paths: I)
where
    I: IntoIterator<Item = PathBuf>,
{
    if let Ok(mut guard) = EXTRA_SEARCH_PATHS.lock() {
        for path in paths {
            if !guard.contains(&path) {
                guard.push(path);
            }
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = EXTRA_SEARCH_PATHS
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_default();
    if let Some(path_var) = env::var_os("PATH") {
        paths.extend(env::split_paths(&path_var));
    }
    paths
}

/// Resolves an executable name on the search path, like `which`.
pub fn which(executable_name: &str) -> Option<PathBuf> {
    if executable_name.is_empty() {
        return None;
    }
    let candidate = Path::new(executable_name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    search_paths().into_iter().find_map(|dir| {
        let full = dir.join(executable_name);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(target_os = "windows") {
            let exe = dir.join(format!("{executable_name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Whether [`which`] finds `executable_name`.
pub fn is_executable_in_path(executable_name: &str) -> bool {
    which(executable_name).is_some()
}

/// Names of the files found in the search path directories, sorted.
pub fn executables_on_search_path() -> Vec<String> {
    let names: BTreeSet<String> = search_paths()
        .iter()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(Result::ok))
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.into_iter().collect()
}

/// Lists the executables among `candidates` that are resolvable on the search path.
pub fn available_executables(candidates: &[&str]) -> Vec<String> {
    candidates
        .iter()
        .filter(|name| is_executable_in_path(name))
        .map(|name| (*name).to_string())
        .collect()
}

/// Checks whether a Python module is importable by the system interpreter.
///
/// The first interpreter found among `python3` and `python` is asked to locate
/// the module without importing it. Without an interpreter, nothing is importable.
pub fn python_module_available(module: &str) -> bool {
    if let Some(found) = PYTHON_LOOKUPS
        .lock()
        .ok()
        .and_then(|guard| guard.get(module).copied())
    {
        return found;
    }
    let found = ["python3", "python"]
        .iter()
        .find_map(|interpreter| which(interpreter))
        .map(|interpreter| {
            StdCommand::new(interpreter)
                .arg("-c")
                .arg("import importlib.util, sys; sys.exit(0 if importlib.util.find_spec(sys.argv[1]) else 1)")
                .arg(module)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        })
        .unwrap_or(false);
    log::debug!("Python module '{}' available: {}", module, found);
    if let Ok(mut guard) = PYTHON_LOOKUPS.lock() {
        guard.insert(module.to_string(), found);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_expand_path_makes_relative_paths_absolute() {
        let path = expand_path("some/relative/dir").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("some/relative/dir"));
    }

    #[test]
    fn test_expand_path_expands_home() {
        let home = home_dir().unwrap();
        let path = expand_path("~/Notes").unwrap();
        assert_eq!(path, dunce::simplified(&home.join("Notes")).to_path_buf());
    }

    #[test]
    fn test_expand_path_rejects_unknown_variable() {
        let result = expand_path("$TIERKIT_SURELY_UNDEFINED_VARIABLE/x");
        assert!(matches!(result, Err(PathError::Expansion { .. })));
    }

    #[test]
    fn test_which_uses_extra_search_paths() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let tool = dir.path().join("tierkit-fake-tool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();

        // --- Execute ---
        assert!(which("tierkit-fake-tool").is_none());
        add_search_paths([dir.path().to_path_buf()]);

        // --- Assert ---
        assert_eq!(which("tierkit-fake-tool"), Some(tool));
        assert!(executables_on_search_path().contains(&"tierkit-fake-tool".to_string()));
    }

    #[test]
    fn test_which_missing_tool() {
        assert!(!is_executable_in_path("tierkit-nonexistent-binary-xyz"));
        assert!(available_executables(&["tierkit-nonexistent-binary-xyz"]).is_empty());
    }

    #[test]
    fn test_python_lookup_for_missing_module() {
        assert!(!python_module_available("nonexistent_module_xyz"));
    }
}
