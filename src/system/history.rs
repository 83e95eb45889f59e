// src/system/history.rs

//! Prompt history persisted to a plain file, one line per entry.

use dialoguer::History;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_ENTRIES: usize = 1000;

/// Prompt history backed by a plain text file, one entry per line.
#[derive(Debug, Default)]
pub struct FileHistory {
    path: Option<PathBuf>,
    /// Most recent first.
    entries: VecDeque<String>,
}

impl FileHistory {
    /// Loads the history file if it exists; new entries are appended to it.
    pub fn open(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .rev()
                    .take(MAX_ENTRIES)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    /// A history that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Number of remembered lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn append_to_file(&self, line: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            log::debug!("Could not write history to {}: {}", path.display(), e);
        }
    }
}

impl<T: ToString> History<T> for FileHistory {
    fn read(&self, pos: usize) -> Option<String> {
        self.entries.get(pos).cloned()
    }

    fn write(&mut self, val: &T) {
        let line = val.to_string();
        if line.trim().is_empty() || self.entries.front() == Some(&line) {
            return;
        }
        self.append_to_file(&line);
        self.entries.push_front(line);
        self.entries.truncate(MAX_ENTRIES);
    }
}
