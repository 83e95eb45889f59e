// src/core/console.rs

//! One level of the nested prompt: its config scope chain, attached
//! commands, optional module and prompt.

use crate::constants::{MODULE_LEVEL, RUN_COMMAND, STORE_FILENAME};
use crate::core::application::Application;
use crate::core::command::{Command, CommandContext, CommandError, Outcome};
use crate::core::config::{Config, ConfigError, ConfigOption, ConsoleLink, ProxyConfig, Value};
use crate::core::entity::Entity;
use crate::core::loader::LoaderError;
use crate::core::module::{Hook, Module, ModuleClass, run_hook};
use crate::core::registry::RegistryError;
use crate::core::requirements::{AttributeSource, CheckContext};
use crate::core::tokenizer;
use crate::system::output::apply_style;
use crate::system::recorder::RecorderError;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

/// Errors raised while opening consoles or reading their input.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// A root console is already running.
    #[error("Only one parent console can be used")]
    RootExists,
    /// A console of the same level is already running; `higher` is the
    /// nearest ancestor of another level, if any.
    #[error("Another console of the same level is already running")]
    DuplicateLevel {
        /// The level requested twice.
        level: String,
        /// Where the line should be re-run.
        higher: Option<ConsoleId>,
    },
    /// The registered entity for a level is not a console class.
    #[error("'{0}' is not a console class")]
    NotAConsole(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoaderError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error("Input error: {0}")]
    Input(#[from] std::io::Error),
}

/// Identity of a running console, unique within an [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsoleId(usize);

// --- Console classes ---

/// A styled piece of the prompt; `class` selects the style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSegment {
    /// Style class.
    pub class: String,
    /// Text, with `{attr}` placeholders.
    pub text: String,
}

/// Registration data of a console level.
#[derive(Debug, Clone)]
pub struct ConsoleClass {
    /// Level tag; one class per level.
    pub level: String,
    /// Title of the console's own options table.
    pub title: String,
    /// Prompt segments.
    pub message: Vec<PromptSegment>,
    /// Style spec per segment class.
    pub style: BTreeMap<String, String>,
    /// Do not prepend the parent's prompt.
    pub message_reset: bool,
    /// Options of the console's own scope, with their defaults.
    pub options: Vec<(ConfigOption, Option<String>)>,
}

impl ConsoleClass {
    /// A console class for `level` with an empty prompt and no options.
    pub fn new(level: &str) -> Self {
        Self {
            level: level.to_string(),
            title: "Console options".to_string(),
            message: Vec::new(),
            style: BTreeMap::new(),
            message_reset: false,
            options: Vec::new(),
        }
    }

    /// Sets the title of the console's options table.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Appends a prompt segment styled by `class`; `{attr}` placeholders are
    /// replaced with console attributes.
    pub fn segment(mut self, class: &str, text: &str) -> Self {
        self.message.push(PromptSegment {
            class: class.to_string(),
            text: text.to_string(),
        });
        self
    }

    /// Sets the style of the segments of `class`; see [`apply_style`].
    pub fn style(mut self, class: &str, spec: &str) -> Self {
        self.style.insert(class.to_string(), spec.to_string());
        self
    }

    /// Starts the prompt afresh instead of extending the parent's.
    pub fn message_reset(mut self) -> Self {
        self.message_reset = true;
        self
    }

    /// Declares an option of the console's own scope.
    pub fn option(mut self, option: ConfigOption, default: Option<&str>) -> Self {
        self.options.push((option, default.map(str::to_string)));
        self
    }
}

/// What a command asks for when it wants a nested console.
#[derive(Debug, Clone)]
pub struct ConsoleRequest {
    /// Level of the console to open.
    pub level: String,
    /// Module to run, for module consoles.
    pub module: Option<Rc<Entity>>,
    /// The `logname` attribute; defaults to the application name.
    pub logname: Option<String>,
    /// Options set in the new console's own scope right after creation.
    pub settings: Vec<(String, String)>,
}

impl ConsoleRequest {
    /// A request for a plain console of `level`.
    pub fn new(level: &str) -> Self {
        Self {
            level: level.to_string(),
            module: None,
            logname: None,
            settings: Vec::new(),
        }
    }

    /// A request for the module console running `module`.
    pub fn for_module(module: Rc<Entity>) -> Self {
        let logname = module.name().to_string();
        Self {
            module: Some(module),
            logname: Some(logname),
            ..Self::new(MODULE_LEVEL)
        }
    }

    /// Sets the `logname` attribute, shown by prompts.
    pub fn logname(mut self, name: &str) -> Self {
        self.logname = Some(name.to_string());
        self
    }

    /// Sets `key` in the new console's own scope once it exists.
    pub fn setting(mut self, key: &str, value: &str) -> Self {
        self.settings.push((key.to_string(), value.to_string()));
        self
    }
}

/// What the loop should do after a line was dispatched.
#[derive(Debug)]
pub enum Flow {
    /// Keep prompting at the same console.
    Continue,
    /// The command failed under `abort`.
    Failed,
    /// Close this console.
    Exit,
    /// Start a nested console; `line` is kept for re-execution on a
    /// duplicate level.
    Enter {
        request: ConsoleRequest,
        line: String,
    },
    /// Run these lines, stopping at the first failure.
    Replay(Vec<String>),
}

impl AttributeSource for ConsoleLink {
    fn lookup(&self, path: &str) -> Option<String> {
        self.attribute(path)
    }
}

/// Index in `levels` (root first) of the nearest console, walking up from
/// the last one, whose level differs from `level`.
pub fn nearest_differing_ancestor<S: AsRef<str>>(levels: &[S], level: &str) -> Option<usize> {
    levels.iter().rposition(|l| l.as_ref() != level)
}

// --- Console ---

type SharedCommand = Rc<RefCell<Box<dyn Command>>>;

#[derive(Clone)]
struct AttachedCommand {
    entity: Rc<Entity>,
    instance: SharedCommand,
}

/// The module a module-level console runs.
pub struct ModuleSlot {
    entity: Rc<Entity>,
    config: Config,
    instance: RefCell<Box<dyn Module>>,
}

impl ModuleSlot {
    /// The module entity.
    pub fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }

    /// The module class of the entity.
    pub fn class(&self) -> Option<&ModuleClass> {
        self.entity.as_module()
    }

    /// The module's own option scope.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A running console: its own scope chained to its ancestors', the
/// commands attached at its level and, for module consoles, the module.
pub struct Console {
    id: ConsoleId,
    level: String,
    parent: Option<ConsoleId>,
    link: Rc<ConsoleLink>,
    scope: Config,
    config: ProxyConfig,
    module: Option<ModuleSlot>,
    commands: BTreeMap<String, AttachedCommand>,
    message: Vec<PromptSegment>,
    style: BTreeMap<String, String>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("parent", &self.parent)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ModuleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSlot")
            .field("entity", &self.entity.id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Console {
    /// Builds the console requested on top of `stack` (root first; empty for
    /// the root console) and attaches its commands.
    ///
    /// # Errors
    /// Returns [`ConsoleError::DuplicateLevel`] when the top of the stack has
    /// the requested level, and [`ConsoleError::RootExists`] when a second
    /// root is built.
    pub fn new(app: &mut Application, request: ConsoleRequest, stack: &[Console]) -> Result<Self, ConsoleError> {
        let class_entity = app.registry().console_class(&request.level)?;
        let class = class_entity
            .as_console()
            .ok_or_else(|| ConsoleError::NotAConsole(request.level.clone()))?
            .clone();

        let parent = stack.last();
        match parent {
            None => {
                if !app.claim_root() {
                    return Err(ConsoleError::RootExists);
                }
            }
            Some(p) if p.level == class.level => {
                let levels: Vec<&str> = stack.iter().map(|c| c.level.as_str()).collect();
                let higher = nearest_differing_ancestor(&levels, &class.level)
                    .and_then(|i| stack.get(i))
                    .map(|c| c.id);
                log::debug!("Duplicate '{}' console, falling back to {:?}", class.level, higher);
                return Err(ConsoleError::DuplicateLevel {
                    level: class.level,
                    higher,
                });
            }
            Some(_) => {}
        }

        let id = ConsoleId(app.next_console_id());
        let link = Rc::new(ConsoleLink::default());
        let logname = request.logname.clone().unwrap_or_else(|| app.appname().to_string());
        for (name, value) in [
            ("appname", app.appname().to_string()),
            ("level", class.level.clone()),
            ("console.level", class.level.clone()),
            ("logname", logname),
        ] {
            link.set_attribute(name, value);
        }

        let scope = Config::new(class.title.clone(), app.globals());
        scope.attach_link(link.clone());
        for (option, default) in &class.options {
            let default = if parent.is_none() {
                app.settings()
                    .root_defaults
                    .get(option.name())
                    .cloned()
                    .or_else(|| default.clone())
            } else {
                default.clone()
            };
            scope.declare(option.clone(), default.as_deref());
        }

        let module = match &request.module {
            Some(entity) => Some(Self::module_slot(app, entity, &link)?),
            None => None,
        };

        let mut scopes: Vec<Config> = module.iter().map(|m| m.config.clone()).collect();
        scopes.push(scope.clone());
        if let Some(p) = parent {
            scopes.extend(p.config.scopes().iter().cloned());
        }
        let config = ProxyConfig::new(scopes);

        for (key, value) in &request.settings {
            let option = config.option(key).unwrap_or_else(|_| ConfigOption::new(key.clone()));
            scope.declare(option, None);
            scope.set(key, value)?;
        }

        let (message, style) = Self::compose_prompt(&class, parent, &link);
        let mut console = Self {
            id,
            level: class.level,
            parent: parent.map(|p| p.id),
            link,
            scope,
            config,
            module,
            commands: BTreeMap::new(),
            message,
            style,
        };
        log::debug!("Starting {} console [{:?}]", console.level, console.id);
        console.reset(app);
        Ok(console)
    }

    fn module_slot(app: &Application, entity: &Rc<Entity>, link: &Rc<ConsoleLink>) -> Result<ModuleSlot, ConsoleError> {
        let class = entity
            .as_module()
            .ok_or_else(|| ConsoleError::NotAConsole(entity.name().to_string()))?;
        for (name, value) in [
            ("module.fullpath", class.fullpath()),
            ("console.module.fullpath", class.fullpath()),
            ("fullpath", class.fullpath()),
            ("category", class.category()),
            ("base", class.base()),
            ("name", class.name.clone()),
        ] {
            link.set_attribute(name, value);
        }
        let config = Config::new("Module options", app.globals());
        config.attach_link(link.clone());
        class.declare_options(&config);
        Ok(ModuleSlot {
            entity: entity.clone(),
            config,
            instance: RefCell::new(class.instantiate()),
        })
    }

    /// The parent's prompt minus its trailing separator, then this
    /// console's segments, then the separator again.
    fn compose_prompt(
        class: &ConsoleClass,
        parent: Option<&Console>,
        link: &ConsoleLink,
    ) -> (Vec<PromptSegment>, BTreeMap<String, String>) {
        let own: Vec<PromptSegment> = class
            .message
            .iter()
            .map(|s| PromptSegment {
                class: s.class.clone(),
                text: crate::core::template::substitute_attributes(&s.text, |a| link.attribute(a)),
            })
            .collect();
        match parent {
            Some(p) if !class.message_reset => {
                let mut message = p.message.clone();
                let separator = message.pop();
                message.extend(own);
                message.extend(separator);
                let mut style = p.style.clone();
                style.extend(class.style.clone());
                (message, style)
            }
            _ => (own, class.style.clone()),
        }
    }

    // --- Accessors ---

    /// This console's identity.
    pub fn id(&self) -> ConsoleId {
        self.id
    }

    /// The level tag, e.g. `root`.
    pub fn level(&self) -> &str {
        &self.level
    }

    /// The console this one was opened from.
    pub fn parent(&self) -> Option<ConsoleId> {
        self.parent
    }

    /// Whether this is the root console.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The scope chain: module scope, own scope, then the ancestors'.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// This console's own scope.
    pub fn scope(&self) -> &Config {
        &self.scope
    }

    /// The module of a module console.
    pub fn module(&self) -> Option<&ModuleSlot> {
        self.module.as_ref()
    }

    /// The attributes and reset flag shared with this console's scopes.
    pub fn link(&self) -> &ConsoleLink {
        &self.link
    }

    /// The console attribute `name`, e.g. `level` or `fullpath`.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.link.attribute(name)
    }

    /// Every name a command can be invoked by here, sorted.
    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Whether `name` invokes a command here.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// The entity behind the command `name`.
    pub fn command_entity(&self, name: &str) -> Option<Rc<Entity>> {
        self.commands.get(name).map(|c| c.entity.clone())
    }

    /// The command instance behind `name`, shared by its aliases.
    pub fn instance(&self, name: &str) -> Option<SharedCommand> {
        self.commands.get(name).map(|c| c.instance.clone())
    }

    /// Distinct attached commands, each with all its reachable names.
    pub fn attached(&self) -> Vec<(Rc<Entity>, Vec<String>)> {
        let mut grouped: Vec<(Rc<Entity>, Vec<String>)> = Vec::new();
        for (name, attached) in &self.commands {
            match grouped.iter_mut().find(|(e, _)| Rc::ptr_eq(e, &attached.entity)) {
                Some((_, names)) => names.push(name.clone()),
                None => grouped.push((attached.entity.clone(), vec![name.clone()])),
            }
        }
        grouped
    }

    /// Whether the `DEBUG` option reads as `true`.
    pub fn debug_enabled(&self) -> bool {
        self.config
            .get("DEBUG")
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Whether a reset-triggering option changed since the last call.
    pub fn take_reset_request(&self) -> bool {
        self.link.take_reset_request()
    }

    /// Splits `line`, keeping the rest of the line as one argument for
    /// single-argument commands.
    pub fn tokenize(&self, line: &str) -> Vec<String> {
        tokenizer::tokenize(line, |name| {
            self.commands
                .get(name)
                .and_then(|c| c.entity.as_command())
                .is_some_and(|c| c.single_arg)
        })
    }

    // --- Prompt ---

    /// The prompt without styling.
    pub fn prompt_text(&self) -> String {
        self.message.iter().map(|s| s.text.as_str()).collect()
    }

    /// The prompt, styled for the terminal.
    pub fn prompt(&self) -> String {
        self.message
            .iter()
            .map(|s| match self.style.get(&s.class) {
                Some(spec) => apply_style(&s.text, spec).to_string(),
                None => s.text.clone(),
            })
            .collect()
    }

    // --- Lifecycle ---

    /// Detaches every command, then attaches the general and level commands
    /// that are not excluded here and pass their checks. Rebinds the
    /// workspace store and the recorder folder.
    pub fn reset(&mut self, app: &mut Application) {
        self.detach();
        let mut shared: Vec<(Rc<Entity>, SharedCommand)> = Vec::new();
        {
            let ctx = CheckContext {
                config: Some(&self.config),
                state: app.state(),
                attributes: self.link.as_ref(),
            };
            for (name, entity) in app.registry().commands_for(&self.level) {
                let Some(class) = entity.as_command() else {
                    continue;
                };
                if class.except_levels.iter().any(|l| *l == self.level) || !entity.check(&ctx) {
                    continue;
                }
                let instance = match shared.iter().find(|(e, _)| Rc::ptr_eq(e, &entity)) {
                    Some((_, instance)) => instance.clone(),
                    None => {
                        let instance = Rc::new(RefCell::new(class.instantiate()));
                        shared.push((entity.clone(), instance.clone()));
                        instance
                    }
                };
                self.commands.insert(name, AttachedCommand { entity, instance });
            }
        }

        match self.config.get("WORKSPACE") {
            Ok(Value::Text(workspace)) => {
                let workspace = PathBuf::from(workspace);
                app.bind_store(&workspace.join(STORE_FILENAME));
                app.recorder_mut().set_root_dir(workspace);
            }
            Ok(_) => {}
            Err(e) => log::debug!("No workspace bound: {}", e),
        }
        log::debug!(
            "Reset {} console [{:?}]: {} command name(s)",
            self.level,
            self.id,
            self.commands.len()
        );
    }

    /// Drops every attached command.
    pub fn detach(&mut self) {
        self.commands.clear();
    }

    /// Runs a module hook if this console has a module. Returns whether it
    /// succeeded (true without module).
    pub fn run_module_hook(&self, app: &mut Application, hook: Hook) -> bool {
        let mut ctx = CommandContext::new(self, app);
        self.module_hook(hook, &mut ctx)
    }

    fn module_hook(&self, hook: Hook, ctx: &mut CommandContext<'_>) -> bool {
        match &self.module {
            Some(slot) => run_hook(slot.instance.borrow_mut().as_mut(), hook, ctx),
            None => true,
        }
    }

    /// Runs the attached module's main body.
    ///
    /// # Errors
    /// Fails without a module, or with the module's own error.
    pub fn run_module(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        match &self.module {
            Some(slot) => slot.instance.borrow_mut().run(ctx),
            None => Err(anyhow::anyhow!("No module loaded")),
        }
    }

    /// Dispatches one line. With `abort`, empty input, unknown commands and
    /// failures yield [`Flow::Failed`]; otherwise they are logged and the
    /// loop goes on.
    pub fn run(&self, app: &mut Application, line: &str, abort: bool) -> Flow {
        let tokens = self.tokenize(line);
        let Some((name, args)) = tokens.split_first() else {
            return if abort { Flow::Failed } else { Flow::Continue };
        };
        let Some(attached) = self.commands.get(name).cloned() else {
            if abort {
                log::error!("Unknown command '{}'", name);
                return Flow::Failed;
            }
            return Flow::Continue;
        };
        let debug = self.debug_enabled();

        let mut ctx = CommandContext::new(self, app);
        match self.execute(&attached, &mut ctx, name, args) {
            Ok(Outcome::Done) => Flow::Continue,
            Ok(Outcome::Exit) => Flow::Exit,
            Ok(Outcome::Enter(request)) => Flow::Enter {
                request,
                line: line.to_string(),
            },
            Ok(Outcome::Replay(lines)) => Flow::Replay(lines),
            Err(CommandError::DebuggerQuit) => Flow::Continue,
            Err(e) => {
                match &e {
                    CommandError::TerminalWidth(_) => log::warn!("Cannot display ; terminal width too low"),
                    _ if debug => log::error!("{:?}", e),
                    _ => log::error!("{}", e),
                }
                if abort { Flow::Failed } else { Flow::Continue }
            }
        }
    }

    fn execute(
        &self,
        attached: &AttachedCommand,
        ctx: &mut CommandContext<'_>,
        name: &str,
        args: &[String],
    ) -> Result<Outcome, CommandError> {
        attached.instance.borrow().validate(ctx, args)?;
        let is_run = name == RUN_COMMAND;
        if is_run && !self.module_hook(Hook::Prerun, ctx) {
            return Ok(Outcome::Done);
        }
        let outcome = attached.instance.borrow_mut().run(ctx, args)?;
        if is_run {
            self.module_hook(Hook::Postrun, ctx);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_differing_ancestor() {
        assert_eq!(nearest_differing_ancestor(&["root", "module"], "module"), Some(0));
        assert_eq!(nearest_differing_ancestor(&["root", "project", "module"], "module"), Some(1));
        assert_eq!(nearest_differing_ancestor(&["root", "module", "module"], "module"), Some(0));
        assert_eq!(nearest_differing_ancestor(&["root"], "root"), None);
    }

    #[test]
    fn test_prompt_composition() {
        let link = ConsoleLink::default();
        link.set_attribute("appname", "tk");
        link.set_attribute("fullpath", "scanners/tcp");
        let root_class = ConsoleClass::new("root")
            .segment("appname", "{appname}")
            .segment("prompt", " > ")
            .style("appname", "bold");
        let (root_message, _) = Console::compose_prompt(&root_class, None, &link);
        let text: String = root_message.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(text, "tk > ");

        let module_class = ConsoleClass::new("module")
            .segment("prompt", " (")
            .segment("module", "{fullpath}")
            .segment("prompt", ")");
        let own = Console::compose_prompt(&module_class, None, &link).0;
        let mut expected = root_message.clone();
        let separator = expected.pop();
        expected.extend(own);
        expected.extend(separator);
        let text: String = expected.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(text, "tk (scanners/tcp) > ");
    }
}
