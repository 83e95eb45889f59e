// src/cli/commands/module.rs

//! Selecting a module (`use`) and running it (`run`).

use super::builtin;
use crate::constants::{MODULE_LEVEL, RUN_COMMAND, SESSION_LEVEL};
use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome, Signature};
use crate::core::console::ConsoleRequest;
use crate::core::entity::Entity;
use crate::core::requirements::CheckContext;

pub(super) fn entities() -> Vec<Entity> {
    vec![
        builtin(
            file!(),
            CommandClass::new("use", || Box::new(Use)).except(&[SESSION_LEVEL]),
            "Select a module",
        ),
        builtin(
            file!(),
            CommandClass::new(RUN_COMMAND, || Box::new(Run)).levels(&[MODULE_LEVEL]),
            "Run module",
        ),
    ]
}

/// Re-checks an entity against the current console.
fn recheck(ctx: &CommandContext<'_>, entity: &Entity) -> bool {
    let check = CheckContext {
        config: Some(ctx.config()),
        state: ctx.app.state(),
        attributes: ctx.console.link(),
    };
    entity.check(&check)
}

// --- use ---

struct Use;

impl Command for Use {
    fn signature(&self) -> Signature {
        Signature::niladic().required("module")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        ctx.app
            .registry()
            .modules()
            .filter(|m| m.is_active())
            .map(|m| m.name().to_string())
            .collect()
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let Some(fullpath) = args.first() else {
            return Ok(Outcome::Done);
        };
        let entity = ctx
            .app
            .registry()
            .module(fullpath)
            .ok_or_else(|| CommandError::invalid("invalid value"))?;
        if ctx
            .console
            .module()
            .is_some_and(|slot| slot.entity().name() == entity.name())
        {
            log::debug!("Module '{}' is already in use", fullpath);
            return Ok(Outcome::Done);
        }
        if !recheck(ctx, &entity) {
            return Err(CommandError::invalid(format!(
                "module '{fullpath}' has issues ; use 'show issues' to see more details"
            )));
        }
        Ok(Outcome::Enter(ConsoleRequest::for_module(entity)))
    }
}

// --- run ---

struct Run;

impl Command for Run {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let console = ctx.console;
        let Some(slot) = console.module() else {
            return Err(CommandError::invalid("no module loaded"));
        };
        if !recheck(ctx, slot.entity()) {
            log::error!("Module '{}' cannot run ; use 'show issues' to see more details", slot.entity().name());
            return Ok(Outcome::Done);
        }
        console.run_module(ctx)?;
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use crate::cli::commands;
    use crate::core::application::{AppSettings, Application};
    use crate::core::loader::{LoadOptions, Sources};
    use crate::core::shell::Shell;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn shell(dir: &TempDir) -> Shell {
        let entities = dir.path().join("entities");
        fs::create_dir_all(entities.join("utils")).unwrap();
        fs::write(
            entities.join("utils").join("touch.toml"),
            r#"
                [[module]]
                name = "touch"
                description = "Creates a marker file in the workspace"
                options = [["MARKER", "marker.txt", true, "File to create"]]
                run = "touch {MARKER}"
            "#,
        )
        .unwrap();
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().join("ws").display().to_string());
        Shell::new(Application::with_settings(AppSettings {
            appname: "tk".to_string(),
            sources: Sources {
                entities: vec![entities],
                ..Sources::default()
            },
            load: LoadOptions {
                plugins: vec![commands::BASE],
                ..LoadOptions::default()
            },
            root_defaults,
            ..AppSettings::default()
        }))
        .unwrap()
    }

    #[test]
    fn test_use_then_run_module() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("ws")).unwrap();
        let mut shell = shell(&dir);
        assert!(!shell.run("run", true));
        assert!(!shell.run("use utils/missing", true));
        assert!(shell.run("use utils/touch", true));
        assert!(shell.run("set MARKER done.txt", true));
        assert!(shell.run("run", true));
        assert!(dir.path().join("ws").join("done.txt").is_file());
    }

    #[test]
    fn test_use_same_module_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        assert!(shell.run("use utils/touch", true));
        let id = shell.top().unwrap().id();
        assert!(shell.run("use utils/touch", true));
        assert_eq!(shell.depth(), 2);
        assert_eq!(shell.top().unwrap().id(), id);
    }
}
