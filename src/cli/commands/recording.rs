// src/cli/commands/recording.rs

//! Recording typed commands to `.rc` files and replaying them.

use super::{builtin, list_dir};
use crate::constants::{PROJECT_LEVEL, RC_EXTENSION, ROOT_LEVEL, SESSION_LEVEL};
use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome, Signature};
use crate::core::entity::Entity;
use crate::system::recorder;
use std::path::Path;

pub(super) fn entities() -> Vec<Entity> {
    vec![
        builtin(
            file!(),
            CommandClass::new("record_status", || Box::new(RecordStatus))
                .alias("record")
                .alias_only()
                .except(&[SESSION_LEVEL]),
            "Consult status for commands recording to a .rc file",
        ),
        builtin(
            file!(),
            CommandClass::new("record", || Box::new(Record)).levels(&[ROOT_LEVEL, PROJECT_LEVEL]),
            "Start/stop or consult status of commands recording to a .rc file",
        ),
        builtin(
            file!(),
            CommandClass::new("replay", || Box::new(Replay)).levels(&[ROOT_LEVEL, PROJECT_LEVEL]),
            "Execute commands from a .rc file",
        ),
    ]
}

fn rc_files(ctx: &CommandContext<'_>) -> Vec<String> {
    list_dir(ctx.app.recorder().root_dir(), |p: &Path| {
        p.is_file() && p.extension().is_some_and(|e| e == RC_EXTENSION)
    })
}

fn log_status(ctx: &CommandContext<'_>) {
    log::info!("Recording is {}", ctx.app.recorder().status());
}

// --- record (status only) ---

struct RecordStatus;

impl Command for RecordStatus {
    fn signature(&self) -> Signature {
        Signature::niladic().required("status")
    }

    fn complete_values(&self, _ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        vec!["status".to_string()]
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        log_status(ctx);
        Ok(Outcome::Done)
    }
}

// --- record ---

struct Record;

impl Command for Record {
    fn signature(&self) -> Signature {
        Signature::niladic().required("key").optional("rcfile", None)
    }

    fn complete_keys(&self, _ctx: &CommandContext<'_>) -> Vec<String> {
        ["start", "stop", "status"].map(String::from).to_vec()
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, key: Option<&str>) -> Vec<String> {
        match key {
            Some("start") => rc_files(ctx),
            _ => Vec::new(),
        }
    }

    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        let signature = self.signature();
        let Some(key) = args.first().filter(|_| args.len() <= signature.max()) else {
            return Err(CommandError::Arity {
                expected: signature.expected(),
                given: args.len(),
            });
        };
        match (key.as_str(), args.get(1)) {
            ("start", None) => Err(CommandError::invalid("please enter a filename")),
            ("start", Some(name)) if ctx.app.recorder().resolve(name).exists() => {
                Err(CommandError::invalid("a file with the same name already exists"))
            }
            ("start", Some(_)) => Ok(()),
            ("stop" | "status", Some(_)) => Err(CommandError::invalid("this key takes no value")),
            ("stop" | "status", None) => Ok(()),
            _ => Err(CommandError::invalid("invalid key")),
        }
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        match (args.first().map(String::as_str), args.get(1)) {
            (Some("start"), Some(name)) => {
                let path = ctx.app.recorder_mut().start(name, false).map_err(anyhow::Error::from)?;
                log::info!("Recording to {}", path.display());
            }
            (Some("stop"), _) => {
                ctx.app.recorder_mut().stop();
                log_status(ctx);
            }
            _ => log_status(ctx),
        }
        Ok(Outcome::Done)
    }
}

// --- replay ---

struct Replay;

impl Command for Replay {
    fn signature(&self) -> Signature {
        Signature::niladic().required("rcfile")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        rc_files(ctx)
    }

    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        let [name] = args else {
            return Err(CommandError::Arity {
                expected: self.signature().expected(),
                given: args.len(),
            });
        };
        if !ctx.app.recorder().resolve(name).is_file() {
            return Err(CommandError::invalid("no such file"));
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let Some(name) = args.first() else {
            return Ok(Outcome::Done);
        };
        let path = ctx.app.recorder().resolve(name);
        log::debug!("Replaying commands from file '{}'...", path.display());
        let lines = recorder::read_commands(&path).map_err(anyhow::Error::from)?;
        Ok(Outcome::Replay(lines))
    }
}

#[cfg(test)]
mod tests {
    use crate::cli::commands;
    use crate::core::application::{AppSettings, Application};
    use crate::core::loader::LoadOptions;
    use crate::core::shell::Shell;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn shell(dir: &TempDir) -> Shell {
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().display().to_string());
        Shell::new(Application::with_settings(AppSettings {
            appname: "tk".to_string(),
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
    fn test_record_then_replay() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        assert!(shell.run("record start session", true));
        assert!(shell.app().recorder().is_enabled());
        for line in ["set DEBUG true", "show options", "record stop"] {
            shell.app().recorder().save(line).unwrap();
            assert!(shell.run(line, true));
        }
        assert!(!shell.app().recorder().is_enabled());
        let recorded = fs::read_to_string(dir.path().join("session.rc")).unwrap();
        assert_eq!(recorded, "set DEBUG true\nshow options\n");

        assert!(!shell.run("record start session", true));
        assert!(shell.run("set DEBUG false", true));
        assert!(shell.run("replay session.rc", true));
        assert!(shell.top().unwrap().debug_enabled());
        log::set_max_level(log::LevelFilter::Info);
    }

    #[test]
    fn test_replay_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.rc"), "set DEBUG true\nbogus\nset DEBUG false\n").unwrap();
        let mut shell = shell(&dir);
        assert!(!shell.run("replay broken.rc", true));
        assert!(shell.top().unwrap().debug_enabled());
        log::set_max_level(log::LevelFilter::Info);
    }

    #[test]
    fn test_record_keys_validation() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        assert!(shell.run("record status", true));
        assert!(!shell.run("record stop now", true));
    }
}
