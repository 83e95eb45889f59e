//! # System Interaction Layer
//!
//! Abstractions over the operating system and the terminal, kept apart from
//! the console logic.
//!
//! ## Modules
//!
//! - **`executor`**: Spawns external processes for manifest commands and
//!   modules, waiting on them or capturing their output.
//! - **`jobs`**: Tracks background processes started by modules.
//! - **`input`** / **`history`**: Line reading with completion, validation
//!   and a persistent history file.
//! - **`output`**: Console output with capture support, tables and styles.
//! - **`recorder`**: Records typed commands to `.rc` files and reads them back.
//! - **`storage`**: Workspace-bound JSON stores.
//! - **`paths`**: Executable and Python module lookups.

pub mod executor;
pub mod history;
pub mod input;
pub mod jobs;
pub mod output;
pub mod paths;
pub mod recorder;
pub mod storage;
