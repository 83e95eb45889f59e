// src/constants.rs

//! Level tags, file names and defaults shared across the crate.

/// Level tag of the single root console.
pub const ROOT_LEVEL: &str = "root";

/// Pseudo-level whose commands are attached to every console.
pub const GENERAL_LEVEL: &str = "general";

/// Level tag of project consoles.
pub const PROJECT_LEVEL: &str = "project";

/// Level tag of module consoles.
pub const MODULE_LEVEL: &str = "module";

/// Level tag of session consoles.
pub const SESSION_LEVEL: &str = "session";

/// The command whose execution is wrapped by the module `prerun`/`postrun` hooks.
pub const RUN_COMMAND: &str = "run";

/// Extension of recorder/replay files.
pub const RC_EXTENSION: &str = "rc";

/// Extension of entity manifests discovered in source folders.
pub const MANIFEST_EXTENSION: &str = "toml";

/// Extension of banner files discovered in source folders.
pub const BANNER_EXTENSION: &str = "txt";

/// Name of the store file bound at every console reset (inside the workspace).
pub const STORE_FILENAME: &str = "store.db";

/// Name of the persisted shared state (inside the application folder).
pub const STATE_FILENAME: &str = "state.json";

/// Name of the prompt history file (inside the application folder).
pub const HISTORY_FILENAME: &str = "history";

/// Default application folder template; `{appname}` is substituted.
pub const DEFAULT_APP_FOLDER: &str = "~/.{appname}";

/// Default workspace folder.
pub const DEFAULT_WORKSPACE: &str = "~/Notes";

/// Commands that are never written by the recorder.
pub const RECORDER_FILTER: &[&str] = &["record", "replay", "exit"];

/// Trailing prompt segment shared by every console.
pub const PROMPT_SEPARATOR: &str = " > ";
