// src/system/executor.rs

//! Spawns external commands with inherited, captured or detached streams.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use thiserror::Error;

/// Failures running an external command.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{0}' exited with a non-zero error code.")]
    NonZeroExitStatus(String),
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Extra environment variables of a child process.
pub type Environment = BTreeMap<String, String>;

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wiring {
    Inherit,
    Capture,
    Detached,
}

fn build(
    program: &str,
    args: &[String],
    cwd: &Path,
    env_vars: &Environment,
    wiring: Wiring,
) -> StdCommand {
    let mut command = StdCommand::new(program);
    command
        .args(args)
        .current_dir(dunce::simplified(cwd))
        .envs(env_vars);
    match wiring {
        Wiring::Inherit => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        Wiring::Capture => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit());
        }
        Wiring::Detached => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
    }
    command
}

/// Parses and spawns `command_line`. Returns `None` for blank input.
fn spawn(
    command_line: &str,
    cwd: &Path,
    env_vars: &Environment,
    wiring: Wiring,
) -> Result<Option<Child>, ExecutionError> {
    let line = command_line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parts = shlex::split(line).ok_or_else(|| ExecutionError::CommandParse(line.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Ok(None);
    };

    // Built-ins such as `echo` only exist inside `cmd` on Windows.
    match build(program, args, cwd, env_vars, wiring).spawn() {
        Ok(child) => Ok(Some(child)),
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            build("cmd", &["/C".to_string(), line.to_string()], cwd, env_vars, wiring)
                .spawn()
                .map(Some)
                .map_err(|e| ExecutionError::CommandFailed(line.to_string(), e))
        }
        Err(e) => Err(ExecutionError::CommandFailed(line.to_string(), e)),
    }
}

/// Runs a command with the terminal's streams and waits for it.
pub fn execute_command(
    command_line: &str,
    cwd: &Path,
    env_vars: &Environment,
) -> Result<(), ExecutionError> {
    let Some(mut child) = spawn(command_line, cwd, env_vars, Wiring::Inherit)? else {
        return Ok(());
    };
    let status = child
        .wait()
        .map_err(|e| ExecutionError::CommandFailed(command_line.trim().to_string(), e))?;
    if !status.success() {
        return Err(ExecutionError::NonZeroExitStatus(command_line.trim().to_string()));
    }
    Ok(())
}

/// Runs a command and returns its standard output. Stderr goes to the terminal.
pub fn execute_and_capture_output(
    command_line: &str,
    cwd: &Path,
    env_vars: &Environment,
) -> Result<String, ExecutionError> {
    let line = command_line.trim();
    let Some(child) = spawn(line, cwd, env_vars, Wiring::Capture)? else {
        return Ok(String::new());
    };
    let output = child
        .wait_with_output()
        .map_err(|e| ExecutionError::CommandFailed(line.to_string(), e))?;
    if !output.status.success() {
        return Err(ExecutionError::NonZeroExitStatus(line.to_string()));
    }
    String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: line.to_string(),
        source: e,
    })
}

/// Starts a command in the background with its streams detached.
pub fn spawn_background(
    command_line: &str,
    cwd: &Path,
    env_vars: &Environment,
) -> Result<Option<Child>, ExecutionError> {
    spawn(command_line, cwd, env_vars, Wiring::Detached)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_capture_output() {
        let dir = tempdir().unwrap();
        let mut env = Environment::new();
        env.insert("TIERKIT_GREETING".into(), "hello".into());
        let out = execute_and_capture_output("sh -c 'echo $TIERKIT_GREETING'", dir.path(), &env).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_non_zero_exit() {
        let dir = tempdir().unwrap();
        let err = execute_command("false", dir.path(), &Environment::new()).unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExitStatus(_)));
    }

    #[test]
    fn test_blank_and_unparsable_lines() {
        let dir = tempdir().unwrap();
        assert!(execute_command("   ", dir.path(), &Environment::new()).is_ok());
        assert!(matches!(
            execute_command("echo \"open", dir.path(), &Environment::new()),
            Err(ExecutionError::CommandParse(_))
        ));
    }

    #[test]
    fn test_background_spawn() {
        let dir = tempdir().unwrap();
        let mut child = spawn_background("sleep 0", dir.path(), &Environment::new())
            .unwrap()
            .unwrap();
        assert!(child.wait().unwrap().success());
    }
}
