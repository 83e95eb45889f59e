// src/cli/commands/utils.rs

//! Utility commands: file editing and viewing, shell escapes, statistics,
//! plus the commands that only exist in debug or development mode.

use super::{builtin, workspace};
use crate::constants::{HISTORY_FILENAME, ROOT_LEVEL, SESSION_LEVEL};
use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome, Signature};
use crate::core::config::Value;
use crate::core::entity::Entity;
use crate::core::requirements::{CheckContext, Requirements};
use crate::system::executor::{self, Environment};
use crate::system::output::Table;
use crate::system::paths;
use anyhow::Context;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub(super) fn entities() -> Vec<Entity> {
    vec![
        builtin(
            file!(),
            CommandClass::new("edit", || Box::new(Edit))
                .except(&[SESSION_LEVEL])
                .single_arg(),
            "Edit a file of the workspace with the text editor",
        )
        .requires(option_is_set("TEXT_EDITOR")),
        builtin(
            file!(),
            CommandClass::new("history", || Box::new(History)).except(&[SESSION_LEVEL]),
            "Inspect the commands history",
        )
        .requires(option_is_set("TEXT_VIEWER")),
        builtin(
            file!(),
            CommandClass::new("shell", || Box::new(ShellEscape))
                .except(&[SESSION_LEVEL])
                .single_arg(),
            "Execute a shell command",
        ),
        builtin(
            file!(),
            CommandClass::new("stats", || Box::new(Stats)).levels(&[ROOT_LEVEL]),
            "Display console's statistics",
        ),
        builtin(
            file!(),
            CommandClass::new("state", || Box::new(State)).except(&[SESSION_LEVEL]),
            "Display console's shared state",
        )
        .requires(Requirements::default().config("DEBUG", "true")),
        builtin(
            file!(),
            CommandClass::new("reload", || Box::new(Reload)).levels(&[ROOT_LEVEL]),
            "Reload the entity sources",
        )
        .when(|options| options.dev),
    ]
}

/// Holds when `option` has a value in the console being checked.
fn option_is_set(option: &'static str) -> Requirements {
    Requirements::default().internal(move |ctx: &CheckContext<'_>| {
        ctx.config
            .is_none_or(|config| config.get(option).is_ok_and(|value| !value.is_unset()))
    })
}

fn option_text(ctx: &CommandContext<'_>, option: &str) -> Result<String, CommandError> {
    match ctx.config().get(option)? {
        Value::Unset => Err(CommandError::invalid(format!("{option} is not set"))),
        value => Ok(value.to_string()),
    }
}

fn quote(path: &Path) -> Result<String, CommandError> {
    let text = path.display().to_string();
    shlex::try_quote(&text)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| CommandError::invalid(format!("cannot quote '{text}'")))
}

/// The workspace, created if missing, to run external programs from.
fn workdir(ctx: &CommandContext<'_>) -> Result<PathBuf, CommandError> {
    let root = workspace(ctx)?;
    fs::create_dir_all(&root).with_context(|| format!("Could not create workspace '{}'", root.display()))?;
    Ok(root)
}

/// Runs `program` on `file`, attached to the terminal, from `cwd`.
fn open_with(program: &str, file: &Path, cwd: &Path) -> Result<(), CommandError> {
    let line = format!("{program} {}", quote(file)?);
    log::debug!("Running '{}'", line);
    executor::execute_command(&line, cwd, &Environment::new()).map_err(anyhow::Error::from)?;
    Ok(())
}

// --- edit ---

struct Edit;

impl Command for Edit {
    fn signature(&self) -> Signature {
        Signature::niladic().required("filename")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        workspace(ctx).map(|root| relative_files(&root)).unwrap_or_default()
    }

    /// New files are allowed, so completions do not restrict the argument.
    fn validate(&self, _ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        match args {
            [name] if !name.trim().is_empty() => Ok(()),
            [_] => Err(CommandError::invalid("empty filename")),
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
        let editor = option_text(ctx, "TEXT_EDITOR")?;
        let root = workdir(ctx)?;
        open_with(&editor, &root.join(name), &root)?;
        Ok(Outcome::Done)
    }
}

/// Files below `root`, as sorted paths relative to it.
fn relative_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.display().to_string())
        })
        .collect();
    files.sort();
    files
}

// --- history ---

struct History;

impl Command for History {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let viewer = option_text(ctx, "TEXT_VIEWER")?;
        let folder = PathBuf::from(option_text(ctx, "APP_FOLDER")?);
        let history = folder.join(HISTORY_FILENAME);
        if !history.is_file() {
            log::info!("No history yet");
            return Ok(Outcome::Done);
        }
        open_with(&viewer, &history, &folder)?;
        Ok(Outcome::Done)
    }
}

// --- shell ---

struct ShellEscape;

impl Command for ShellEscape {
    fn signature(&self) -> Signature {
        Signature::niladic().optional("cmd", None)
    }

    fn complete_values(&self, _ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        paths::executables_on_search_path()
    }

    /// Only the program has to be resolvable; its arguments are free.
    fn validate(&self, _ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        match args {
            [] => Ok(()),
            [line] => match shlex::split(line).as_deref() {
                Some([program, ..]) if paths::is_executable_in_path(program) => Ok(()),
                _ => Err(CommandError::invalid("bad shell command")),
            },
            _ => Err(CommandError::Arity {
                expected: self.signature().expected(),
                given: args.len(),
            }),
        }
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let line = match args.first() {
            Some(line) => line.clone(),
            None => env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
        };
        let cwd = workdir(ctx)?;
        executor::execute_command(&line, &cwd, &Environment::new()).map_err(anyhow::Error::from)?;
        Ok(Outcome::Done)
    }
}

// --- stats ---

struct Stats;

impl Command for Stats {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let mut table = Table::new(&["Item", "Path", "Size"]).title("Statistics");
        for option in ["APP_FOLDER", "WORKSPACE"] {
            let Ok(path) = option_text(ctx, option) else {
                continue;
            };
            let size = human_size(folder_size(Path::new(&path)));
            table.row([option.to_string(), path, size]);
        }
        table.row(["Uptime".to_string(), String::new(), ctx.app.uptime()]);
        ctx.out().print(&table.render());
        Ok(Outcome::Done)
    }
}

/// Total size in bytes of the files below `root`.
fn folder_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = "KB";
    for next in UNITS.iter().skip(1) {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{size:.1}{unit}")
}

// --- state ---

struct State;

impl Command for State {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let state = ctx.app.state().read();
        if state.is_empty() {
            log::info!("The shared state is empty");
            return Ok(Outcome::Done);
        }
        let mut text = String::new();
        for (key, value) in state.iter() {
            let pretty = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
            text.push_str(&format!("\n{key}:\n"));
            for line in pretty.lines() {
                text.push_str(&format!("  {line}\n"));
            }
        }
        ctx.out().println(&text);
        Ok(Outcome::Done)
    }
}

// --- reload ---

struct Reload;

impl Command for Reload {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let report = ctx.app.load_entities().map_err(anyhow::Error::from)?;
        let check = CheckContext {
            config: Some(ctx.console.config()),
            state: ctx.app.state(),
            attributes: ctx.console.link(),
        };
        ctx.app.registry().check_all(&check);
        log::info!(
            "Reloaded {} manifest(s): {} new, {} refreshed",
            report.manifests.len(),
            report.registered,
            report.duplicates
        );
        ctx.console.link().request_reset();
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use crate::core::application::{AppSettings, Application};
    use crate::core::loader::{LoadOptions, Sources};
    use crate::core::shell::Shell;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn shell_with(dir: &TempDir, dev: bool, extra: &[(&str, &str)]) -> Shell {
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().join("ws").display().to_string());
        for (key, value) in extra {
            root_defaults.insert((*key).to_string(), (*value).to_string());
        }
        Shell::new(Application::with_settings(AppSettings {
            appname: "tk".to_string(),
            sources: Sources {
                entities: vec![dir.path().join("entities")],
                ..Sources::default()
            },
            load: LoadOptions {
                plugins: vec![commands::BASE],
                dev,
                ..LoadOptions::default()
            },
            root_defaults,
        }))
        .unwrap()
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(1536), "1.5KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0MB");
    }

    #[test]
    fn test_relative_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("notes").join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "bb").unwrap();
        let expected = vec!["b.txt".to_string(), Path::new("notes").join("a.txt").display().to_string()];
        assert_eq!(relative_files(dir.path()), expected);
        assert_eq!(folder_size(dir.path()), 3);
    }

    #[test]
    fn test_stats_table() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, false, &[]);
        fs::create_dir_all(dir.path().join("ws")).unwrap();
        fs::write(dir.path().join("ws").join("notes.txt"), "x".repeat(2048)).unwrap();
        let results = shell.play(["stats"], true);
        let output = results[0].1.as_deref().unwrap();
        assert!(output.contains("Statistics"));
        assert!(output.contains("WORKSPACE"));
        assert!(output.contains("2.0KB"));
        assert!(output.contains("Uptime"));
    }

    #[test]
    fn test_state_needs_debug() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, false, &[]);
        shell.app().state().insert("interfaces", json!({"eth0": ["10.0.0.1"]}));
        assert!(!shell.top().unwrap().has_command("state"));

        assert!(shell.run("set DEBUG true", true));
        assert!(shell.top().unwrap().has_command("state"));
        let results = shell.play(["state"], true);
        let output = results[0].1.as_deref().unwrap();
        assert!(output.contains("interfaces:"));
        assert!(output.contains("  \"eth0\""));

        assert!(shell.run("set DEBUG false", true));
        assert!(!shell.top().unwrap().has_command("state"));
        log::set_max_level(log::LevelFilter::Info);
    }

    #[test]
    fn test_edit_and_history_follow_their_tools() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, false, &[("TEXT_EDITOR", "true"), ("TEXT_VIEWER", "true")]);
        assert!(shell.run("edit notes/todo.txt", true));
        assert!(shell.run("history", true));
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app").join(HISTORY_FILENAME), "help\n").unwrap();
        assert!(shell.run("history", true));

        assert!(shell.run("unset TEXT_EDITOR", true));
        assert!(!shell.top().unwrap().has_command("edit"));
        assert!(shell.top().unwrap().has_command("history"));
    }

    #[test]
    fn test_shell_runs_in_workspace() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, false, &[]);
        assert!(shell.run("shell touch created.txt", true));
        assert!(dir.path().join("ws").join("created.txt").is_file());
        assert!(!shell.run("shell tierkit-nonexistent-binary-xyz --flag", true));
        assert!(!shell.run("shell false", true));
    }

    #[test]
    fn test_reload_only_in_dev_mode() {
        let dir = TempDir::new().unwrap();
        assert!(!shell_with(&dir, false, &[]).top().unwrap().has_command("reload"));

        let mut shell = shell_with(&dir, true, &[]);
        assert!(shell.app().is_dev());
        assert!(shell.top().unwrap().has_command("reload"));
        assert!(!shell.top().unwrap().has_command("hello"));

        let entities = dir.path().join("entities");
        fs::create_dir_all(&entities).unwrap();
        fs::write(
            entities.join("hello.toml"),
            "[[command]]\nname = \"hello\"\nlevel = \"root\"\nrun = \"true\"\n",
        )
        .unwrap();
        assert!(shell.run("reload", true));
        assert!(shell.top().unwrap().has_command("hello"));
    }
}
