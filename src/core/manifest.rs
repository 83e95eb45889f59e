// src/core/manifest.rs

//! Commands and modules declared in manifests. Both run shell command
//! templates whose `{NAME}` placeholders are filled from arguments, options
//! and console attributes.

use crate::core::command::{Command, CommandContext, CommandError, Outcome, Signature};
use crate::core::config::Value;
use crate::core::module::Module;
use crate::core::template;
use crate::models::ValuesManifest;
use crate::system::executor::{self, Environment};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Folder commands run in: the workspace when it exists, else the current one.
fn working_dir(ctx: &CommandContext<'_>) -> PathBuf {
    match ctx.config().get("WORKSPACE") {
        Ok(Value::Text(path)) if PathBuf::from(&path).is_dir() => PathBuf::from(path),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Resolves a placeholder from `locals`, then options, then attributes.
fn resolve(ctx: &CommandContext<'_>, locals: &BTreeMap<String, String>, name: &str) -> Option<String> {
    if let Some(value) = locals.get(name) {
        return Some(value.clone());
    }
    match ctx.config().get(name) {
        Ok(value) if !value.is_unset() => return Some(value.to_string()),
        _ => {}
    }
    ctx.console.attribute(name)
}

/// Expands and runs each line in order, stopping at the first failure.
fn run_lines(
    ctx: &CommandContext<'_>,
    lines: &[String],
    locals: &BTreeMap<String, String>,
    env: &Environment,
    capture: bool,
) -> anyhow::Result<()> {
    let cwd = working_dir(ctx);
    for line in lines {
        let expanded = template::expand_template(line, |name| resolve(ctx, locals, name));
        log::debug!("Executing: {}", expanded);
        if capture || ctx.out().is_capturing() {
            let output = executor::execute_and_capture_output(&expanded, &cwd, env)?;
            ctx.out().print(&output);
        } else {
            executor::execute_command(&expanded, &cwd, env)?;
        }
    }
    Ok(())
}

// --- Commands ---

/// A command whose `run` replays lines from its manifest.
#[derive(Debug)]
pub struct ManifestCommand {
    signature: Signature,
    params: Vec<(String, Option<String>)>,
    keys: Vec<String>,
    values: Option<ValuesManifest>,
    lines: Vec<String>,
    capture: bool,
}

impl ManifestCommand {
    /// `params` entries are `name` or `name=default` (optional).
    pub fn new(
        params: &[String],
        keys: Vec<String>,
        values: Option<ValuesManifest>,
        lines: Vec<String>,
        capture: bool,
    ) -> Self {
        let params: Vec<(String, Option<String>)> = params
            .iter()
            .map(|p| match p.split_once('=') {
                Some((name, default)) => (name.trim().to_string(), Some(default.trim().to_string())),
                None => (p.trim().to_string(), None),
            })
            .collect();
        let signature = params.iter().fold(Signature::niladic(), |sig, (name, default)| match default {
            Some(d) => sig.optional(name, Some(d)),
            None => sig.required(name),
        });
        Self {
            signature,
            params,
            keys,
            values,
            lines,
            capture,
        }
    }
}

impl Command for ManifestCommand {
    fn signature(&self) -> Signature {
        self.signature.clone()
    }

    fn complete_keys(&self, _ctx: &CommandContext<'_>) -> Vec<String> {
        self.keys.clone()
    }

    fn complete_values(&self, _ctx: &CommandContext<'_>, key: Option<&str>) -> Vec<String> {
        match &self.values {
            None => Vec::new(),
            Some(ValuesManifest::List(values)) => values.clone(),
            Some(ValuesManifest::PerKey(map)) => key
                .or_else(|| self.params.first().map(|(n, _)| n.as_str()))
                .and_then(|k| map.get(k))
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let mut locals = BTreeMap::new();
        for (i, (name, default)) in self.params.iter().enumerate() {
            if let Some(value) = args.get(i).cloned().or_else(|| default.clone()) {
                locals.insert(i.to_string(), value.clone());
                locals.insert(name.clone(), value);
            }
        }
        run_lines(ctx, &self.lines, &locals, &Environment::new(), self.capture)?;
        Ok(Outcome::Done)
    }
}

// --- Modules ---

/// A module running the command lines of its manifest.
#[derive(Debug)]
pub struct ManifestModule {
    lines: Vec<String>,
    background: bool,
}

impl ManifestModule {
    /// A module running `lines`, as a background job when `background`.
    pub fn new(lines: Vec<String>, background: bool) -> Self {
        Self { lines, background }
    }

    /// Option values used by the templates, exported to the environment too.
    fn environment(&self, ctx: &CommandContext<'_>) -> anyhow::Result<Environment> {
        let mut env = Environment::new();
        for line in &self.lines {
            for name in template::placeholders(line) {
                if ctx.config().contains(&name) {
                    let value = ctx.config().get(&name)?;
                    if !value.is_unset() {
                        env.insert(name, value.to_string());
                    }
                }
            }
        }
        Ok(env)
    }
}

impl Module for ManifestModule {
    fn run(&mut self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let env = self.environment(ctx)?;
        if !self.background {
            return run_lines(ctx, &self.lines, &env, &env, false);
        }
        let cwd = working_dir(ctx);
        for line in &self.lines {
            let expanded = template::expand_template(line, |name| resolve(ctx, &env, name));
            if let Some(pid) = ctx.app.jobs_mut().spawn(&expanded, &cwd, &env)? {
                log::info!("Started job {} ({})", pid, expanded);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_from_params() {
        let command = ManifestCommand::new(
            &["host".to_string(), "count=1".to_string()],
            Vec::new(),
            None,
            vec!["ping -c {count} {host}".to_string()],
            false,
        );
        assert_eq!(command.signature().usage("ping"), "ping host [count=1]");
    }
}
