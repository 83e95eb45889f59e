// src/cli/commands/project.rs

//! Projects are folders of the root workspace; selecting one opens a
//! project console working inside it.

use super::{builtin, list_dir, workspace};
use crate::constants::{PROJECT_LEVEL, ROOT_LEVEL};
use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome, Signature};
use crate::core::console::ConsoleRequest;
use crate::core::entity::Entity;
use crate::system::output::Table;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub(super) fn entities() -> Vec<Entity> {
    vec![
        builtin(
            file!(),
            CommandClass::new("select", || Box::new(Select))
                .levels(&[ROOT_LEVEL])
                .single_arg(),
            "Select a project (create if it does not exist)",
        ),
        builtin(
            file!(),
            CommandClass::new("projects", || Box::new(Projects)).levels(&[ROOT_LEVEL, PROJECT_LEVEL]),
            "List existing projects",
        ),
        builtin(
            file!(),
            CommandClass::new("delete", || Box::new(Delete))
                .levels(&[ROOT_LEVEL])
                .single_arg(),
            "Delete a project",
        ),
    ]
}

/// Projects live next to the current project, or in the root workspace.
fn projects_root(ctx: &CommandContext<'_>) -> Result<PathBuf, CommandError> {
    let workspace = workspace(ctx)?;
    if ctx.console.level() == PROJECT_LEVEL {
        return Ok(workspace.parent().map(Path::to_path_buf).unwrap_or(workspace));
    }
    Ok(workspace)
}

fn project_names(ctx: &CommandContext<'_>) -> Vec<String> {
    projects_root(ctx)
        .map(|root| list_dir(&root, Path::is_dir))
        .unwrap_or_default()
}

fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

// --- select ---

struct Select;

impl Command for Select {
    fn signature(&self) -> Signature {
        Signature::niladic().required("project")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        project_names(ctx)
    }

    /// Any valid name is accepted; unknown projects are created.
    fn validate(&self, _ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        match args {
            [name] if is_valid_name(name) => Ok(()),
            [_] => Err(CommandError::invalid("invalid project name")),
            _ => Err(CommandError::Arity {
                expected: self.signature().expected(),
                given: args.len(),
            }),
        }
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let Some(name) = args.first() else {
            return Ok(Outcome::Done);
        };
        let path = workspace(ctx)?.join(name);
        if !path.exists() {
            log::debug!("Creating project '{}'...", name);
            fs::create_dir_all(&path).with_context(|| format!("Could not create project '{}'", name))?;
            log::info!("'{}' created", name);
        }
        Ok(Outcome::Enter(
            ConsoleRequest::new(PROJECT_LEVEL)
                .logname(name)
                .setting("WORKSPACE", &path.display().to_string()),
        ))
    }
}

// --- projects ---

struct Projects;

impl Command for Projects {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let names = project_names(ctx);
        if names.is_empty() {
            log::info!("No project yet ; use 'select <name>' to create one");
            return Ok(Outcome::Done);
        }
        let mut table = Table::new(&["Name"]).title("Existing projects");
        for name in names {
            table.row([name]);
        }
        ctx.out().print(&table.render());
        Ok(Outcome::Done)
    }
}

// --- delete ---

struct Delete;

impl Command for Delete {
    fn signature(&self) -> Signature {
        Signature::niladic().required("project")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        project_names(ctx)
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let Some(name) = args.first() else {
            return Ok(Outcome::Done);
        };
        let path = projects_root(ctx)?.join(name);
        fs::remove_dir_all(&path).with_context(|| format!("Could not delete project '{}'", name))?;
        log::info!("'{}' deleted", name);
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use crate::core::application::{AppSettings, Application};
    use crate::core::config::Value;
    use crate::core::loader::LoadOptions;
    use crate::core::shell::Shell;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("acme"));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name(" "));
    }

    #[test]
    fn test_select_opens_project_console() {
        let dir = TempDir::new().unwrap();
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().join("ws").display().to_string());
        let mut shell = Shell::new(Application::with_settings(AppSettings {
            appname: "tk".to_string(),
            load: LoadOptions {
                plugins: vec![commands::BASE],
                ..LoadOptions::default()
            },
            root_defaults,
            ..AppSettings::default()
        }))
        .unwrap();

        assert!(shell.run("select acme corp", true));
        let project = dir.path().join("ws").join("acme corp");
        assert!(project.is_dir());
        assert_eq!(shell.levels(), vec!["root", "project"]);
        let top = shell.top().unwrap();
        assert_eq!(top.prompt_text(), "tk[acme corp] > ");
        assert_eq!(
            top.config().get("WORKSPACE").unwrap(),
            Value::Text(project.display().to_string())
        );
        assert_eq!(shell.app().recorder().root_dir(), project.as_path());
        assert!(!shell.top().unwrap().has_command("select"));

        let results = shell.play(["projects", "back"], true);
        assert!(results[0].1.as_deref().unwrap().contains("acme corp"));
        assert_eq!(shell.levels(), vec!["root"]);
        assert_eq!(shell.app().recorder().root_dir(), dir.path().join("ws").as_path());

        assert!(!shell.run("delete unknown", true));
        assert!(shell.run("delete acme corp", true));
        assert!(!project.exists());
        assert!(!shell.run("delete acme corp", true));
    }
}
