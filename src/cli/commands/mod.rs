// src/cli/commands/mod.rs

//! The base command set, registered as the `base` plugin.

use crate::cli::consoles;
use crate::core::command::{CommandClass, CommandContext, CommandError};
use crate::core::config::Value;
use crate::core::entity::Entity;
use crate::core::loader::Plugin;
use crate::core::metadata::Metadata;
use crate::core::registry::EntityRegistry;
use std::fs;
use std::path::{Path, PathBuf};

pub mod general;
pub mod module;
pub mod options;
pub mod project;
pub mod recording;
pub mod utils;

/// The built-in consoles and commands.
pub const BASE: Plugin = Plugin {
    name: "base",
    register,
    base: true,
};

/// Registers every built-in entity.
pub fn register(registry: &mut EntityRegistry) {
    consoles::register(registry);
    let entities = general::entities()
        .into_iter()
        .chain(options::entities())
        .chain(recording::entities())
        .chain(module::entities())
        .chain(project::entities())
        .chain(utils::entities());
    for entity in entities {
        registry.register(entity);
    }
}

/// A compiled command entity; `source` is the defining file.
fn builtin(source: &str, class: CommandClass, description: &str) -> Entity {
    Entity::command(source, class).with_metadata(Metadata::default().description(description))
}

/// The `WORKSPACE` folder of the console.
fn workspace(ctx: &CommandContext<'_>) -> Result<PathBuf, CommandError> {
    match ctx.config().get("WORKSPACE")? {
        Value::Text(path) => Ok(PathBuf::from(path)),
        _ => Err(CommandError::invalid("WORKSPACE is not set")),
    }
}

/// Rejects an argument that is not among `values`.
fn expect_member(values: &[String], value: &str, message: &str) -> Result<(), CommandError> {
    if values.iter().any(|v| v == value) {
        Ok(())
    } else {
        Err(CommandError::invalid(message))
    }
}

/// Sorted names of the entries of `dir` accepted by `keep`.
fn list_dir(dir: &Path, keep: impl Fn(&Path) -> bool) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| keep(p))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{GENERAL_LEVEL, MODULE_LEVEL, PROJECT_LEVEL, ROOT_LEVEL};
    use tempfile::TempDir;

    fn names(registry: &EntityRegistry, level: &str) -> Vec<String> {
        registry.commands_for(level).into_iter().map(|(n, _)| n).collect()
    }

    #[test]
    fn test_base_commands_per_level() {
        let mut registry = EntityRegistry::new();
        register(&mut registry);
        assert!(registry.command(GENERAL_LEVEL, "?").is_some());
        let root = names(&registry, ROOT_LEVEL);
        for name in ["help", "exit", "quit", "set", "setg", "show", "use", "select", "record", "replay"] {
            assert!(root.contains(&name.to_string()), "missing {name}");
        }
        let module = names(&registry, MODULE_LEVEL);
        assert!(module.contains(&"run".to_string()));
        assert!(!module.contains(&"select".to_string()));
        assert!(!names(&registry, PROJECT_LEVEL).contains(&"run".to_string()));
        assert!(registry.command(GENERAL_LEVEL, "record_status").is_none());
        assert!(registry.command(ROOT_LEVEL, "stats").is_some());
        assert!(registry.command(PROJECT_LEVEL, "stats").is_none());
        assert!(registry.command(ROOT_LEVEL, "delete").is_some());
    }

    #[test]
    fn test_list_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::create_dir(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("notes.rc"), "help\n").unwrap();
        assert_eq!(list_dir(dir.path(), Path::is_dir), vec!["alpha", "beta"]);
        assert_eq!(
            list_dir(dir.path(), |p| p.extension().is_some_and(|e| e == "rc")),
            vec!["notes.rc"]
        );
        assert!(list_dir(&dir.path().join("missing"), Path::is_dir).is_empty());
    }
}
