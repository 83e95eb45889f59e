// src/cli/commands/options.rs

//! Option commands: `set`/`unset` in the current scope chain and
//! `setg`/`unsetg` for process-wide overrides.

use super::{builtin, expect_member};
use crate::constants::SESSION_LEVEL;
use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome, Signature};
use crate::core::config::SetStatus;
use crate::core::entity::Entity;

pub(super) fn entities() -> Vec<Entity> {
    vec![
        builtin(
            file!(),
            CommandClass::new("set", || Box::new(Set)).except(&[SESSION_LEVEL]),
            "Set an option in the current context",
        ),
        builtin(
            file!(),
            CommandClass::new("unset", || Box::new(Unset)).except(&[SESSION_LEVEL]),
            "Unset an option from the current context",
        ),
        builtin(
            file!(),
            CommandClass::new("setg", || Box::new(SetGlobal)).except(&[SESSION_LEVEL]),
            "Set a global option",
        ),
        builtin(
            file!(),
            CommandClass::new("unsetg", || Box::new(UnsetGlobal)).except(&[SESSION_LEVEL]),
            "Unset a global option",
        ),
    ]
}

fn arity_error(signature: &Signature, given: usize) -> CommandError {
    CommandError::Arity {
        expected: signature.expected(),
        given,
    }
}

/// Values proposed for `key`: its choices, or nothing if it is unknown.
fn option_choices(ctx: &CommandContext<'_>, key: &str) -> Vec<String> {
    ctx.config()
        .option(key)
        .map(|o| o.choice_list())
        .unwrap_or_default()
}

// --- set ---

struct Set;

impl Command for Set {
    fn signature(&self) -> Signature {
        Signature::niladic().required("key").required("value")
    }

    fn complete_keys(&self, ctx: &CommandContext<'_>) -> Vec<String> {
        ctx.config().keys(false)
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, key: Option<&str>) -> Vec<String> {
        key.map(|k| option_choices(ctx, k)).unwrap_or_default()
    }

    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        let [key, value] = args else {
            return Err(arity_error(&self.signature(), args.len()));
        };
        expect_member(&self.complete_keys(ctx), key, "invalid option")?;
        let option = ctx.config().option(key)?;
        if !option.accepts(value) {
            return Err(CommandError::invalid("invalid value"));
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let [key, value] = args else {
            return Err(arity_error(&self.signature(), args.len()));
        };
        if let SetStatus::Changed(_) = ctx.config().set(key, value)? {
            if let Some(error) = ctx.config().last_error(key) {
                log::error!("{}", error);
            }
        }
        Ok(Outcome::Done)
    }
}

// --- unset ---

struct Unset;

impl Command for Unset {
    fn signature(&self) -> Signature {
        Signature::niladic().required("key")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        ctx.config()
            .keys(false)
            .into_iter()
            .filter(|k| ctx.config().option(k).is_ok_and(|o| !o.is_required()))
            .collect()
    }

    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        let [key] = args else {
            return Err(arity_error(&self.signature(), args.len()));
        };
        expect_member(&ctx.config().keys(false), key, "invalid option")?;
        if ctx.config().option(key)?.is_required() {
            return Err(CommandError::invalid("this option is required"));
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        if let Some(key) = args.first() {
            ctx.config().unset(key)?;
        }
        Ok(Outcome::Done)
    }
}

// --- setg ---

struct SetGlobal;

impl Command for SetGlobal {
    fn signature(&self) -> Signature {
        Signature::niladic().required("key").required("value")
    }

    fn complete_keys(&self, ctx: &CommandContext<'_>) -> Vec<String> {
        ctx.config().keys(true)
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, key: Option<&str>) -> Vec<String> {
        key.map(|k| option_choices(ctx, k)).unwrap_or_default()
    }

    /// Unknown keys are accepted; they only live in the override map.
    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        let [key, value] = args else {
            return Err(arity_error(&self.signature(), args.len()));
        };
        if let Ok(option) = ctx.config().option(key) {
            if !option.is_global() {
                return Err(CommandError::invalid("cannot be set as global"));
            }
            if !option.accepts(value) {
                return Err(CommandError::invalid("invalid value"));
            }
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let [key, value] = args else {
            return Err(arity_error(&self.signature(), args.len()));
        };
        ctx.config().set_global(key, value)?;
        Ok(Outcome::Done)
    }
}

// --- unsetg ---

struct UnsetGlobal;

impl Command for UnsetGlobal {
    fn signature(&self) -> Signature {
        Signature::niladic().required("key")
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        ctx.app.globals().keys()
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        if let Some(key) = args.first() {
            ctx.config().unset_global(key)?;
        }
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

    fn shell(dir: &TempDir) -> Shell {
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().join("ws").display().to_string());
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
    fn test_set_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        assert!(!shell.run("set NOPE 1", true));
        assert!(!shell.run("set DEBUG maybe", true));
        assert!(!shell.run("set DEBUG", true));
        assert!(!shell.run("unset WORKSPACE", true));
    }

    #[test]
    fn test_global_override_applies_to_defaults() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        let other = dir.path().join("other");
        assert!(shell.run(&format!("setg WORKSPACE {}", other.display()), true));
        let top = shell.top().unwrap();
        assert_eq!(
            top.config().get("WORKSPACE").unwrap(),
            Value::Text(other.display().to_string())
        );
        assert!(!shell.run("setg APP_FOLDER /tmp", true));
        assert!(shell.run("unsetg WORKSPACE", true));
        assert!(!shell.run("unsetg WORKSPACE", true));
        let workspace = shell.top().unwrap().config().get("WORKSPACE").unwrap();
        assert_eq!(workspace, Value::Text(dir.path().join("ws").display().to_string()));
    }
}
