// src/core/command.rs

//! The command contract: signature-derived arity, default validation and
//! completion, and the execution context handed to `run`.

use crate::constants::GENERAL_LEVEL;
use crate::core::application::Application;
use crate::core::config::{ConfigError, ProxyConfig};
use crate::core::console::{Console, ConsoleRequest};
use crate::system::output::Output;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

// --- Errors ---

/// Why a command failed to validate or run.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Wrong number of arguments; the message always starts with `validate() `.
    #[error("validate() takes {expected} positional argument(s) but {given} were given")]
    Arity { expected: String, given: usize },
    /// An argument was rejected.
    #[error("{0}")]
    InvalidValue(String),
    /// The terminal is too narrow for the output of the command.
    #[error("invalid width {0} (must be > 0)")]
    TerminalWidth(i64),
    /// An interactive debugger was quit; treated as success.
    #[error("debugger quit")]
    DebuggerQuit,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// An [`CommandError::InvalidValue`] with `message`.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }
}

// --- Signature ---

/// The three validation/completion forms derived from a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// `COMMAND`
    Niladic,
    /// `COMMAND VALUE`
    Value,
    /// `COMMAND KEY VALUE`
    KeyValue,
}

/// A named parameter, with its default for optional ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub default: Option<String>,
}

/// Parameters of a command's `run`: required ones first, then optional ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    required: Vec<Param>,
    optional: Vec<Param>,
}

impl Signature {
    /// A signature without parameters.
    pub fn niladic() -> Self {
        Self::default()
    }

    /// Appends a required parameter.
    pub fn required(mut self, name: &str) -> Self {
        self.required.push(Param {
            name: name.to_string(),
            default: None,
        });
        self
    }

    /// Appends an optional parameter.
    ///
    /// # Arguments
    ///
    /// * `name` - Shown in the usage string.
    /// * `default` - Shown as `name=default`; `None` shows the bare name.
    pub fn optional(mut self, name: &str, default: Option<&str>) -> Self {
        self.optional.push(Param {
            name: name.to_string(),
            default: default.map(str::to_string),
        });
        self
    }

    /// Number of required arguments.
    pub fn min(&self) -> usize {
        self.required.len()
    }

    /// Total number of arguments.
    pub fn max(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    /// The validation form: no argument, one value, or a key and a value.
    pub fn arity(&self) -> Arity {
        match self.max() {
            0 => Arity::Niladic,
            1 => Arity::Value,
            _ => Arity::KeyValue,
        }
    }

    /// Usage string: `name a b [c=d]`.
    pub fn usage(&self, name: &str) -> String {
        let mut parts = vec![name.to_string()];
        parts.extend(self.required.iter().map(|p| p.name.clone()));
        parts.extend(self.optional.iter().map(|p| match &p.default {
            Some(default) => format!("[{}={}]", p.name, default),
            None => format!("[{}]", p.name),
        }));
        parts.join(" ")
    }

    /// Accepted argument count, as shown in arity errors.
    pub fn expected(&self) -> String {
        if self.min() == self.max() {
            self.min().to_string()
        } else {
            format!("from {} to {}", self.min(), self.max())
        }
    }
}

// --- Outcome ---

/// What the console loop should do after a command ran.
#[derive(Debug)]
pub enum Outcome {
    Done,
    /// Leave the current console.
    Exit,
    /// Start a nested console.
    Enter(ConsoleRequest),
    /// Dispatch these lines next, stopping at the first failure.
    Replay(Vec<String>),
}

// --- Context ---

/// What a command sees while it completes, validates or runs.
pub struct CommandContext<'a> {
    /// The console the command belongs to.
    pub console: &'a Console,
    /// The shared application.
    pub app: &'a mut Application,
}

impl fmt::Debug for CommandContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("console", &self.console)
            .field("app", &self.app)
            .finish()
    }
}

impl<'a> CommandContext<'a> {
    /// Context for a command run by `console`.
    pub fn new(console: &'a Console, app: &'a mut Application) -> Self {
        Self { console, app }
    }

    /// Options of the running console, globals included.
    pub fn config(&self) -> &ProxyConfig {
        self.console.config()
    }

    /// Command output.
    pub fn out(&self) -> &Output {
        self.app.output()
    }
}

// --- Command trait ---

/// A console command. One instance exists per console that attaches it.
pub trait Command {
    fn signature(&self) -> Signature {
        Signature::niladic()
    }

    fn complete_keys(&self, _ctx: &CommandContext<'_>) -> Vec<String> {
        Vec::new()
    }

    /// Values for the single-value form (`key` is `None`) or for `key`.
    fn complete_values(&self, _ctx: &CommandContext<'_>, _key: Option<&str>) -> Vec<String> {
        Vec::new()
    }

    /// Rejects bad input before `run`; see [`default_validate`].
    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        default_validate(self, ctx, args)
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError>;
}

/// Enforces the arity bounds of the signature, then checks arguments against
/// the completion lists when those are not empty.
pub fn default_validate<C>(
    command: &C,
    ctx: &CommandContext<'_>,
    args: &[String],
) -> Result<(), CommandError>
where
    C: Command + ?Sized,
{
    let signature = command.signature();
    if args.len() < signature.min() || args.len() > signature.max() {
        return Err(CommandError::Arity {
            expected: signature.expected(),
            given: args.len(),
        });
    }
    match signature.arity() {
        Arity::Niladic => {}
        Arity::Value => {
            if let Some(value) = args.first() {
                let values = command.complete_values(ctx, None);
                if !values.is_empty() && !values.contains(value) {
                    return Err(CommandError::invalid("invalid value"));
                }
            }
        }
        Arity::KeyValue => {
            if let Some(key) = args.first() {
                let keys = command.complete_keys(ctx);
                if !keys.is_empty() && !keys.contains(key) {
                    return Err(CommandError::invalid("invalid key"));
                }
                if let Some(value) = args.get(1) {
                    let values = command.complete_values(ctx, Some(key));
                    if !values.is_empty() && !values.contains(value) {
                        return Err(CommandError::invalid("invalid value"));
                    }
                }
            }
        }
    }
    Ok(())
}

// --- Command class ---

/// Builds a fresh command instance for each console.
pub type CommandFactory = Rc<dyn Fn() -> Box<dyn Command>>;

/// Registration data of a command: where it applies and how to build it.
#[derive(Clone)]
pub struct CommandClass {
    pub name: String,
    pub levels: Vec<String>,
    pub aliases: Vec<String>,
    /// Only the aliases are registered, not the name itself.
    pub alias_only: bool,
    pub except_levels: Vec<String>,
    /// Everything after the name is a single argument.
    pub single_arg: bool,
    factory: CommandFactory,
}

impl fmt::Debug for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandClass")
            .field("name", &self.name)
            .field("levels", &self.levels)
            .field("aliases", &self.aliases)
            .field("except_levels", &self.except_levels)
            .finish_non_exhaustive()
    }
}

impl CommandClass {
    /// A general command (attached at every level) built by `factory`.
    pub fn new<F>(name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Command> + 'static,
    {
        Self {
            name: name.to_string(),
            levels: vec![GENERAL_LEVEL.to_string()],
            aliases: Vec::new(),
            alias_only: false,
            except_levels: Vec::new(),
            single_arg: false,
            factory: Rc::new(factory),
        }
    }

    /// Restricts the command to the given levels.
    pub fn levels(mut self, levels: &[&str]) -> Self {
        self.levels = levels.iter().map(|l| (*l).to_string()).collect();
        self
    }

    /// Adds an alternative name.
    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    /// Registers the aliases only.
    pub fn alias_only(mut self) -> Self {
        self.alias_only = true;
        self
    }

    /// Excludes levels the command would otherwise attach to.
    pub fn except(mut self, levels: &[&str]) -> Self {
        self.except_levels.extend(levels.iter().map(|l| (*l).to_string()));
        self
    }

    /// Passes everything after the name as one argument.
    pub fn single_arg(mut self) -> Self {
        self.single_arg = true;
        self
    }

    /// Names under which the command is reachable.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if !self.alias_only {
            names.push(self.name.clone());
        }
        names.extend(self.aliases.iter().cloned());
        names
    }

    /// Whether the command attaches to consoles of `level`.
    pub fn applies_at(&self, level: &str) -> bool {
        (self.levels.iter().any(|l| l == level || l == GENERAL_LEVEL))
            && !self.except_levels.iter().any(|l| l == level)
    }

    /// A new instance of the command.
    pub fn instantiate(&self) -> Box<dyn Command> {
        (self.factory)()
    }
}
