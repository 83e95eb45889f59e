// src/core/application.rs

//! The application context threaded through consoles and commands in place
//! of process-wide singletons.

use crate::core::config::GlobalOptions;
use crate::core::loader::{self, LoadOptions, LoadReport, LoaderError, Sources};
use crate::core::registry::EntityRegistry;
use crate::CancellationToken;
use crate::state::StateStore;
use crate::system::jobs::{JobPool, ProcessPool};
use crate::system::output::Output;
use crate::system::recorder::Recorder;
use crate::system::storage::{MemoryStoragePool, StoragePool, StoreHandle};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Startup settings of an [`Application`].
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    /// Name used in prompts and the default app folder.
    pub appname: String,
    /// Folders entities, banners and libraries are read from.
    pub sources: Sources,
    /// Load options.
    pub load: LoadOptions,
    /// Defaults overriding those of the root console's options.
    pub root_defaults: BTreeMap<String, String>,
}

/// The context shared by every console of a session: registry, state,
/// global options, recorder, storage and jobs.
pub struct Application {
    settings: AppSettings,
    registry: EntityRegistry,
    state: StateStore,
    globals: GlobalOptions,
    recorder: Recorder,
    storage: Box<dyn StoragePool>,
    store: Option<StoreHandle>,
    jobs: Box<dyn JobPool>,
    output: Output,
    started: Instant,
    interrupt: CancellationToken,
    root_claimed: bool,
    next_console: usize,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("settings", &self.settings)
            .field("entities", &self.registry.len())
            .field("recorder", &self.recorder)
            .field("store", &self.store)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// An application with default settings and no loaded entity.
    pub fn new(appname: &str) -> Self {
        Self::with_settings(AppSettings {
            appname: appname.to_string(),
            ..AppSettings::default()
        })
    }

    /// An application with the given settings.
    ///
    /// # Arguments
    ///
    /// * `settings` - Sources, load options and root option defaults.
    pub fn with_settings(settings: AppSettings) -> Self {
        Self {
            settings,
            registry: EntityRegistry::new(),
            state: StateStore::default(),
            globals: GlobalOptions::default(),
            recorder: Recorder::default(),
            storage: Box::new(MemoryStoragePool::default()),
            store: None,
            jobs: Box::new(ProcessPool::default()),
            output: Output::default(),
            started: Instant::now(),
            interrupt: CancellationToken::default(),
            root_claimed: false,
            next_console: 0,
        }
    }

    // --- Builders ---

    /// Replaces the shared state store.
    pub fn with_state(mut self, state: StateStore) -> Self {
        self.state = state;
        self
    }

    /// Replaces the storage pool.
    pub fn with_storage(mut self, storage: Box<dyn StoragePool>) -> Self {
        self.storage = storage;
        self
    }

    /// Replaces the job pool.
    pub fn with_jobs(mut self, jobs: Box<dyn JobPool>) -> Self {
        self.jobs = jobs;
        self
    }

    // --- Accessors ---

    /// The application name.
    pub fn appname(&self) -> &str {
        &self.settings.appname
    }

    /// Startup settings.
    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Whether development mode is on.
    pub fn is_dev(&self) -> bool {
        self.settings.load.dev
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// The entity registry, mutably.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// The shared state store.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Global options shared by every console.
    pub fn globals(&self) -> &GlobalOptions {
        &self.globals
    }

    /// The command recorder.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// The command recorder, mutably.
    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    /// Where command output is written.
    pub fn output(&self) -> &Output {
        &self.output
    }

    /// The store bound to the current workspace, if any.
    pub fn store(&self) -> Option<&StoreHandle> {
        self.store.as_ref()
    }

    /// The background job pool.
    pub fn jobs(&self) -> &dyn JobPool {
        self.jobs.as_ref()
    }

    /// The background job pool, mutably.
    pub fn jobs_mut(&mut self) -> &mut dyn JobPool {
        self.jobs.as_mut()
    }

    // --- Lifecycle ---

    /// Loads every entity source and applies load options.
    pub fn load_entities(&mut self) -> Result<LoadReport, LoaderError> {
        loader::load(&mut self.registry, &self.settings.sources, &self.settings.load)
    }

    /// Marks the root console as created. Returns false if it already was.
    pub(crate) fn claim_root(&mut self) -> bool {
        !std::mem::replace(&mut self.root_claimed, true)
    }

    pub(crate) fn release_root(&mut self) {
        self.root_claimed = false;
    }

    pub(crate) fn next_console_id(&mut self) -> usize {
        self.next_console += 1;
        self.next_console
    }

    /// Binds the store of the current workspace.
    pub fn bind_store(&mut self, path: &Path) {
        match self.storage.get(path) {
            Ok(handle) => self.store = Some(handle),
            Err(e) => log::warn!("{}", e),
        }
    }

    /// Releases every store.
    pub fn free_storage(&mut self) {
        self.store = None;
        self.storage.free();
    }

    /// The flag an interrupt handler raises.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Whether an interrupt arrived since the last call; clears the flag.
    pub fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }

    /// Time since startup, as `HH:MM:SS`.
    pub fn uptime(&self) -> String {
        format_duration(self.started.elapsed())
    }

    /// Where the state file lives for a given application folder.
    pub fn state_path(app_folder: &Path) -> PathBuf {
        app_folder.join(crate::constants::STATE_FILENAME)
    }
}

/// `HH:MM:SS`, hours not wrapping.
pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_duration(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn test_root_claim_is_exclusive() {
        let mut app = Application::new("test");
        assert!(app.claim_root());
        assert!(!app.claim_root());
        app.release_root();
        assert!(app.claim_root());
    }

    #[test]
    fn test_bind_store() {
        let mut app = Application::new("test");
        app.bind_store(Path::new("/ws/store.db"));
        assert_eq!(app.store().unwrap().path(), Path::new("/ws/store.db"));
        app.free_storage();
        assert!(app.store().is_none());
        assert_eq!(app.uptime().len(), 8);
    }
}
