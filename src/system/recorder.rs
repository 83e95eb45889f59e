// src/system/recorder.rs

//! Records typed commands to `.rc` files and reads them back.

use crate::constants::{RC_EXTENSION, RECORDER_FILTER};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures of the command recorder.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Could not write record file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not read command file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Appends entered commands to a `.rc` file while enabled.
#[derive(Debug, Default)]
pub struct Recorder {
    root_dir: PathBuf,
    file: Option<PathBuf>,
}

impl Recorder {
    /// Folder where relative record files are placed.
    pub fn set_root_dir(&mut self, dir: impl Into<PathBuf>) {
        self.root_dir = dir.into();
    }

    /// The folder relative record paths resolve against.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Whether lines are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// The file being recorded to.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Resolves a record file name: the `.rc` extension is added when
    /// missing and relative paths are placed under the root folder.
    pub fn resolve(&self, filename: &str) -> PathBuf {
        let mut path = PathBuf::from(filename);
        if !path.extension().is_some_and(|e| e == RC_EXTENSION) {
            path = PathBuf::from(format!("{filename}.{RC_EXTENSION}"));
        }
        if path.is_relative() {
            self.root_dir.join(path)
        } else {
            path
        }
    }

    /// Starts recording into a fresh file.
    ///
    /// # Errors
    /// Fails if the file exists and `overwrite` is false, or if it cannot be
    /// created.
    pub fn start(&mut self, filename: &str, overwrite: bool) -> Result<PathBuf, RecorderError> {
        let path = self.resolve(filename);
        if !overwrite && path.exists() {
            return Err(RecorderError::AlreadyExists(path));
        }
        fs::write(&path, "").map_err(|source| RecorderError::Write {
            path: path.clone(),
            source,
        })?;
        log::debug!("Recording to {}", path.display());
        self.file = Some(path.clone());
        Ok(path)
    }

    /// Stops recording; the file is kept.
    pub fn stop(&mut self) {
        if let Some(path) = self.file.take() {
            log::debug!("Stopped recording to {}", path.display());
        }
    }

    /// Appends a line unless recording is off or its command is filtered.
    pub fn save(&self, line: &str) -> Result<(), RecorderError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        match line.split_whitespace().next() {
            None => return Ok(()),
            Some(command) if RECORDER_FILTER.contains(&command) => return Ok(()),
            Some(_) => {}
        }
        let write_err = |source| RecorderError::Write {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(write_err)?;
        writeln!(file, "{line}").map_err(write_err)
    }

    /// `enabled` or `disabled`.
    pub fn status(&self) -> &'static str {
        if self.is_enabled() { "enabled" } else { "disabled" }
    }
}

/// Reads the non-empty lines of a command file.
pub fn read_commands(path: &Path) -> Result<Vec<String>, RecorderError> {
    let content = fs::read_to_string(path).map_err(|source| RecorderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_filter() {
        let dir = tempdir().unwrap();
        let mut recorder = Recorder::default();
        recorder.set_root_dir(dir.path());

        let path = recorder.start("session", false).unwrap();
        assert_eq!(path, dir.path().join("session.rc"));
        assert!(recorder.is_enabled());

        for line in ["help", "record status", "set DEBUG true", "replay x", "exit"] {
            recorder.save(line).unwrap();
        }
        recorder.stop();
        recorder.save("show options").unwrap();

        assert_eq!(read_commands(&path).unwrap(), vec!["help", "set DEBUG true"]);
        assert_eq!(recorder.status(), "disabled");
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let mut recorder = Recorder::default();
        recorder.set_root_dir(dir.path());
        recorder.start("dup", false).unwrap();
        recorder.stop();
        assert!(matches!(
            recorder.start("dup", false),
            Err(RecorderError::AlreadyExists(_))
        ));
        assert!(recorder.start("dup", true).is_ok());
    }

    #[test]
    fn test_explicit_rc_path_is_kept() {
        let recorder = Recorder::default();
        assert_eq!(recorder.resolve("/tmp/x.rc"), PathBuf::from("/tmp/x.rc"));
        let mut recorder = recorder;
        recorder.set_root_dir("/ws");
        assert_eq!(recorder.resolve("x.rc"), PathBuf::from("/ws/x.rc"));
        assert_eq!(recorder.resolve("sub/x"), PathBuf::from("/ws/sub/x.rc"));
    }
}
