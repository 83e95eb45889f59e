// src/cli/consoles.rs

//! The built-in console levels: root, project and module.

use crate::constants::{
    DEFAULT_APP_FOLDER, DEFAULT_WORKSPACE, MODULE_LEVEL, PROJECT_LEVEL, PROMPT_SEPARATOR, ROOT_LEVEL,
};
use crate::core::config::{ConfigOption, OptionEvent};
use crate::core::console::ConsoleClass;
use crate::core::entity::Entity;
use crate::core::registry::EntityRegistry;
use crate::system::paths;
use anyhow::Context;
use std::fs;

const EDITORS: &[&str] = &["atom", "emacs", "gedit", "mousepad", "nano", "notepad", "notepad++", "vi", "vim"];
const VIEWERS: &[&str] = &["bat", "less", "more", "view"];

/// Registers the root, project and module consoles.
pub fn register(registry: &mut EntityRegistry) {
    for class in [root_console(), project_console(), module_console()] {
        registry.register(Entity::console(file!(), class));
    }
}

fn set_log_level(event: &OptionEvent<'_>) {
    let level = if event.value.as_bool() == Some(true) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    log::set_max_level(level);
}

fn create_workspace(event: &OptionEvent<'_>) -> anyhow::Result<Option<String>> {
    let path = event.value.to_string();
    fs::create_dir_all(&path).with_context(|| format!("Could not create workspace '{}'", path))?;
    Ok(None)
}

fn executable_option(name: &str, description: &str, candidates: &'static [&'static str]) -> ConfigOption {
    ConfigOption::new(name)
        .description(description)
        .reset_console()
        .lazy_choices(move || paths::available_executables(candidates))
        .validate(paths::is_executable_in_path)
}

/// The root level: application-wide options, welcome banner.
pub fn root_console() -> ConsoleClass {
    let editor = paths::available_executables(EDITORS).into_iter().next();
    let viewer = paths::available_executables(VIEWERS).into_iter().next();
    ConsoleClass::new(ROOT_LEVEL)
        .title("Main options")
        .segment("appname", "{appname}")
        .segment("prompt", PROMPT_SEPARATOR)
        .style("appname", "#eeeeee bold")
        .style("prompt", "#eeeeee")
        .option(
            ConfigOption::new("APP_FOLDER")
                .description("Folder where application assets (i.e. history and state) are saved")
                .required(true)
                .global(false),
            Some(DEFAULT_APP_FOLDER),
        )
        .option(
            ConfigOption::new("DEBUG")
                .description("Debug mode")
                .required(true)
                .boolean()
                .reset_console()
                .on_set(|event| {
                    set_log_level(event);
                    Ok(None)
                }),
            Some("false"),
        )
        .option(
            executable_option("TEXT_EDITOR", "Text file editor to be used", EDITORS),
            editor.as_deref(),
        )
        .option(
            executable_option("TEXT_VIEWER", "Text file viewer (pager) to be used", VIEWERS),
            viewer.as_deref(),
        )
        .option(
            ConfigOption::new("WORKSPACE")
                .description("Folder where results are saved")
                .required(true)
                .on_set(create_workspace),
            Some(DEFAULT_WORKSPACE),
        )
}

/// A project folder of the root workspace.
pub fn project_console() -> ConsoleClass {
    ConsoleClass::new(PROJECT_LEVEL)
        .title("Project options")
        .segment("prompt", "[")
        .segment("project", "{logname}")
        .segment("prompt", "]")
        .style("project", "#0000ff")
}

/// The console entered by `use`.
pub fn module_console() -> ConsoleClass {
    ConsoleClass::new(MODULE_LEVEL)
        .segment("prompt", " ")
        .segment("prompt", "{category}")
        .segment("prompt", "(")
        .segment("module", "{base}")
        .segment("prompt", ")")
        .style("module", "#ff0000")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, GlobalOptions, Value};
    use tempfile::TempDir;

    #[test]
    fn test_register_levels() {
        let mut registry = EntityRegistry::new();
        register(&mut registry);
        for level in [ROOT_LEVEL, PROJECT_LEVEL, MODULE_LEVEL] {
            assert!(registry.console_class(level).is_ok());
        }
        register(&mut registry);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_workspace_is_created_on_set() {
        let dir = TempDir::new().unwrap();
        let config = Config::new("Main options", &GlobalOptions::default());
        for (option, default) in root_console().options {
            config.declare(option, default.as_deref());
        }
        let target = dir.path().join("a").join("b");
        config.set("WORKSPACE", &target.display().to_string()).unwrap();
        assert!(target.is_dir());
        assert_eq!(config.get("DEBUG").unwrap(), Value::Bool(false));
        assert!(config.set("DEBUG", "maybe").is_err());
    }
}
