// src/core/shell.rs

//! The loop driver: owns the application and the stack of running consoles,
//! reads lines and interprets the [`Flow`] each dispatch returns.

use crate::constants::ROOT_LEVEL;
use crate::core::application::Application;
use crate::core::command::CommandContext;
use crate::core::completer::CommandCompleter;
use crate::core::console::{Console, ConsoleError, ConsoleRequest, Flow};
use crate::core::module::{self, Hook};
use crate::core::registry::IssueFilter;
use crate::core::requirements::CheckContext;
use crate::core::validator::InputValidator;
use crate::system::input::{Candidate, LineAssist, LineReader, ReadOutcome};
use crate::system::recorder;
use colored::Colorize;
use dialoguer::console::Term;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_TERMINAL_WIDTH: usize = 80;

/// Completion and validation for the line typed at the top console.
struct ConsoleAssist<'a, 'c> {
    ctx: &'a CommandContext<'c>,
}

impl LineAssist for ConsoleAssist<'_, '_> {
    fn complete(&self, text: &str) -> Vec<Candidate> {
        CommandCompleter::new(self.ctx).complete(text)
    }

    fn validate(&self, text: &str) -> Result<(), String> {
        InputValidator::new(self.ctx).validate(text)
    }
}

/// The stack of running consoles, root first, over one [`Application`].
pub struct Shell {
    app: Application,
    /// Running consoles, root first.
    stack: Vec<Console>,
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("app", &self.app)
            .field("levels", &self.levels())
            .finish()
    }
}

impl Shell {
    /// Loads every entity, starts the root console and prints the banner,
    /// the module summary and a warning when some entity has issues.
    ///
    /// # Errors
    /// Fails when a manifest is malformed or no root console is registered.
    pub fn new(mut app: Application) -> Result<Self, ConsoleError> {
        let report = app.load_entities()?;
        log::debug!(
            "Loaded {} entities from {} manifest(s) ({} duplicate(s), {} excluded, {} conditional)",
            report.registered,
            report.manifests.len(),
            report.duplicates,
            report.excluded,
            report.conditional
        );
        if let Some(banner) = pick_banner(&report.banners) {
            app.output().println(banner.trim_end());
        }

        let root = Console::new(&mut app, ConsoleRequest::new(ROOT_LEVEL), &[])?;
        {
            let ctx = CheckContext {
                config: Some(root.config()),
                state: app.state(),
                attributes: root.link(),
            };
            app.registry().check_all(&ctx);
        }
        for line in module::summary(app.registry().modules()) {
            app.output().println(&line.green().to_string());
        }
        if app.registry().has_issues(&IssueFilter::default()) {
            log::warn!("There are some issues ; use 'show issues' to see more details");
        }
        root.run_module_hook(&mut app, Hook::Preload);

        Ok(Self { app, stack: vec![root] })
    }

    // --- Accessors ---

    /// The shared application.
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// The shared application, mutably.
    pub fn app_mut(&mut self) -> &mut Application {
        &mut self.app
    }

    /// The console receiving input.
    pub fn top(&self) -> Option<&Console> {
        self.stack.last()
    }

    /// Number of running consoles.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Levels of the running consoles, root first.
    pub fn levels(&self) -> Vec<String> {
        self.stack.iter().map(|c| c.level().to_string()).collect()
    }

    /// Whether any console is still open.
    pub fn is_running(&self) -> bool {
        !self.stack.is_empty()
    }

    // --- Dispatch ---

    /// Dispatches one line at the top console. Returns false when the line
    /// failed under `abort` or nothing is running anymore.
    pub fn run(&mut self, line: &str, abort: bool) -> bool {
        let Some(top) = self.stack.last() else {
            return false;
        };
        let flow = top.run(&mut self.app, line, abort);
        let ok = match flow {
            Flow::Continue => true,
            Flow::Failed => false,
            Flow::Exit => {
                self.close_top();
                true
            }
            Flow::Enter { request, line } => self.enter(request, &line, abort),
            Flow::Replay(lines) => self.replay(&lines),
        };
        self.apply_resets();
        ok
    }

    fn enter(&mut self, request: ConsoleRequest, line: &str, abort: bool) -> bool {
        match Console::new(&mut self.app, request, &self.stack) {
            Ok(console) => {
                console.run_module_hook(&mut self.app, Hook::Preload);
                log::debug!("Entered {} console", console.level());
                self.stack.push(console);
                true
            }
            Err(ConsoleError::DuplicateLevel { higher: Some(id), level }) => {
                while self.stack.last().is_some_and(|c| c.id() != id) {
                    self.close_top();
                }
                let Some(target) = self.stack.last_mut() else {
                    return false;
                };
                target.reset(&mut self.app);
                log::debug!("Re-running '{}' from the {} console (duplicate {})", line, target.level(), level);
                self.run(line, abort)
            }
            Err(e @ ConsoleError::DuplicateLevel { higher: None, .. }) => {
                log::warn!("{}", e);
                false
            }
            Err(e) => {
                log::error!("{}", e);
                !abort
            }
        }
    }

    /// Runs `lines` in order, stopping at the first failure.
    fn replay(&mut self, lines: &[String]) -> bool {
        for line in lines {
            if !self.is_running() {
                return false;
            }
            if self.app.take_interrupt() {
                log::warn!("Replay interrupted before '{}'", line);
                return false;
            }
            if !self.run(line, true) {
                log::warn!("Replay stopped at '{}'", line);
                return false;
            }
        }
        true
    }

    /// Resets every console an option change asked to.
    fn apply_resets(&mut self) {
        for console in self.stack.iter_mut() {
            if console.take_reset_request() {
                console.reset(&mut self.app);
            }
        }
    }

    // --- Closing ---

    /// Runs the postload hook and closes the top console. Closing the root
    /// releases storage, stops jobs and saves the state.
    pub fn close_top(&mut self) {
        let Some(mut console) = self.stack.pop() else {
            return;
        };
        console.run_module_hook(&mut self.app, Hook::Postload);
        console.detach();
        log::debug!("Closed {} console", console.level());

        match self.stack.last_mut() {
            Some(parent) => {
                parent.reset(&mut self.app);
                let reaped = self.app.jobs_mut().free();
                if reaped > 0 {
                    log::debug!("Reaped {} finished job(s)", reaped);
                }
            }
            None => {
                self.app.free_storage();
                self.app.jobs_mut().terminate();
                if let Some(folder) = app_folder(&console) {
                    let path = Application::state_path(&folder);
                    match self.app.state().save_if_dirty(&path) {
                        Ok(true) => log::debug!("Saved state to {}", path.display()),
                        Ok(false) => {}
                        Err(e) => log::warn!("{}", e),
                    }
                }
                self.app.release_root();
            }
        }
    }

    /// Closes every console, top first.
    pub fn close_all(&mut self) {
        while self.is_running() {
            self.close_top();
        }
    }

    // --- Loops ---

    /// Reads and dispatches lines until every console is closed. End of
    /// input closes the top console; an interrupt only drops the line.
    ///
    /// # Errors
    /// Fails when the reader itself fails.
    pub fn start(&mut self, reader: &mut dyn LineReader) -> Result<(), ConsoleError> {
        loop {
            let Some(outcome) = self.with_context(|ctx| {
                let prompt = ctx.console.prompt();
                reader.read_line(&prompt, &ConsoleAssist { ctx })
            }) else {
                break;
            };
            match outcome? {
                ReadOutcome::Line(line) => {
                    self.app.take_interrupt();
                    if let Err(e) = self.app.recorder().save(&line) {
                        log::warn!("{}", e);
                    }
                    self.run(&line, false);
                }
                ReadOutcome::Interrupted => continue,
                ReadOutcome::Eof => {
                    if let Err(e) = self.app.recorder().save("exit") {
                        log::warn!("{}", e);
                    }
                    self.close_top();
                }
            }
        }
        Ok(())
    }

    /// Runs `f` with a command context bound to the top console. Returns
    /// `None` when no console is running.
    pub fn with_context<R>(&mut self, f: impl FnOnce(&CommandContext<'_>) -> R) -> Option<R> {
        let top = self.stack.last()?;
        let ctx = CommandContext::new(top, &mut self.app);
        Some(f(&ctx))
    }

    /// Runs `commands` in order and stops at the first failure.
    ///
    /// With `capture`, returns each command with its output; commands after
    /// a failure get `None` and a trailing `exit` is left out. Without it,
    /// each command is announced by a header line and nothing is returned.
    pub fn play<I, S>(&mut self, commands: I, capture: bool) -> Vec<(String, Option<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut results = Vec::new();
        let mut failed = false;
        for command in commands {
            let command: String = command.into();
            if !failed && self.app.take_interrupt() {
                log::warn!("Replay interrupted before '{}'", command);
                failed = true;
            }
            if !capture {
                if failed || !self.is_running() {
                    break;
                }
                self.app.output().println(&center(&format!(" {command} "), terminal_width(), '+'));
                failed = !self.run(&command, true);
                continue;
            }
            if failed || !self.is_running() {
                results.push((command, None));
                continue;
            }
            self.app.output().start_capture();
            failed = !self.run(&command, true);
            let output = self.app.output().stop_capture();
            results.push((command, Some(output)));
        }
        if results.last().is_some_and(|(c, _)| c == "exit") {
            results.pop();
        }
        results
    }

    /// Plays the commands of an rc file.
    ///
    /// # Errors
    /// Fails when the file cannot be read.
    pub fn rcfile(&mut self, path: &Path, capture: bool) -> Result<Vec<(String, Option<String>)>, ConsoleError> {
        let commands = recorder::read_commands(path)?;
        log::debug!("Playing {} command(s) from {}", commands.len(), path.display());
        Ok(self.play(commands, capture))
    }
}

fn app_folder(console: &Console) -> Option<PathBuf> {
    match console.config().get("APP_FOLDER") {
        Ok(value) if !value.is_unset() => Some(PathBuf::from(value.to_string())),
        _ => None,
    }
}

/// One of the banner files, picked from the clock.
fn pick_banner(banners: &[PathBuf]) -> Option<String> {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as usize)
        .unwrap_or_default();
    let path = banners.get(seed.checked_rem(banners.len())?)?;
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            log::debug!("Could not read banner {}: {}", path.display(), e);
            None
        }
    }
}

fn terminal_width() -> usize {
    Term::stdout()
        .size_checked()
        .map_or(DEFAULT_TERMINAL_WIDTH, |(_, cols)| cols as usize)
}

fn center(text: &str, width: usize, fill: char) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    format!(
        "{}{}{}",
        fill.to_string().repeat(left),
        text,
        fill.to_string().repeat(right)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use crate::core::application::AppSettings;
    use crate::core::loader::{LoadOptions, Sources};
    use crate::system::input::ScriptReader;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn shell_with(dir: &TempDir, sources: Sources) -> Shell {
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().join("ws").display().to_string());
        let app = Application::with_settings(AppSettings {
            appname: "tk".to_string(),
            sources,
            load: LoadOptions {
                plugins: vec![commands::BASE],
                ..LoadOptions::default()
            },
            root_defaults,
        });
        Shell::new(app).unwrap()
    }

    fn module_source(dir: &TempDir) -> PathBuf {
        let root = dir.path().join("entities");
        fs::create_dir_all(root.join("scanners")).unwrap();
        fs::write(
            root.join("scanners").join("echo.toml"),
            r#"
                [[module]]
                name = "echo"
                description = "Echoes its target"
                options = [["TARGET", "localhost", true, "What to echo"]]
                run = "echo {TARGET}"
            "#,
        )
        .unwrap();
        root
    }

    #[test]
    fn test_center() {
        assert_eq!(center(" ab ", 10, '+'), "+++ ab +++");
        assert_eq!(center(" abc ", 10, '+'), "++ abc +++");
        assert_eq!(center("too long", 4, '+'), "too long");
    }

    #[test]
    fn test_show_options_reflects_debug() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, Sources::default());
        let results = shell.play(["help", "show options", "set DEBUG true", "show options"], true);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(_, output)| output.is_some()));
        let before = results[1].1.as_deref().unwrap();
        let after = results[3].1.as_deref().unwrap();
        let debug_line = |text: &str| text.lines().find(|l| l.contains("DEBUG")).map(str::to_string);
        assert!(debug_line(before).unwrap().contains("false"));
        assert!(debug_line(after).unwrap().contains("true"));
        assert!(shell.top().unwrap().debug_enabled());
        log::set_max_level(log::LevelFilter::Info);
    }

    #[test]
    fn test_play_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, Sources::default());
        let results = shell.play(["help", "bogus", "show options", "exit"], true);
        assert_eq!(results.len(), 3);
        assert!(results[1].1.is_some());
        assert!(results[2].1.is_none());
        assert!(shell.is_running());
    }

    #[test]
    fn test_interrupt_stops_replay() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, Sources::default());
        shell.app().cancellation_token().store(true, Ordering::SeqCst);
        let results = shell.play(["set DEBUG true", "show options"], true);
        assert!(results.iter().all(|(_, output)| output.is_none()));
        assert!(!shell.top().unwrap().debug_enabled());

        fs::create_dir_all(dir.path().join("ws")).unwrap();
        fs::write(dir.path().join("ws").join("init.rc"), "set DEBUG true\n").unwrap();
        shell.app().cancellation_token().store(true, Ordering::SeqCst);
        assert!(!shell.run("replay init.rc", true));
        assert!(!shell.top().unwrap().debug_enabled());
        assert!(!shell.app().take_interrupt());
    }

    #[test]
    fn test_enter_and_leave_module() {
        let dir = TempDir::new().unwrap();
        let sources = Sources {
            entities: vec![module_source(&dir)],
            ..Sources::default()
        };
        let mut shell = shell_with(&dir, sources);
        assert!(shell.run("use scanners/echo", true));
        assert_eq!(shell.levels(), vec!["root", "module"]);
        assert_eq!(shell.top().unwrap().prompt_text(), "tk scanners(echo) > ");
        assert!(shell.top().unwrap().has_command("run"));
        assert!(shell.run("back", true));
        assert_eq!(shell.levels(), vec!["root"]);
        assert!(!shell.top().unwrap().has_command("run"));
    }

    #[test]
    fn test_duplicate_level_reruns_at_parent() {
        let dir = TempDir::new().unwrap();
        let root = module_source(&dir);
        fs::write(
            root.join("scanners").join("other.toml"),
            "[[module]]\nname = \"other\"\nrun = \"true\"\n",
        )
        .unwrap();
        let sources = Sources {
            entities: vec![root],
            ..Sources::default()
        };
        let mut shell = shell_with(&dir, sources);
        assert!(shell.run("use scanners/echo", true));
        let first = shell.top().unwrap().id();
        assert!(shell.run("use scanners/other", true));
        assert_eq!(shell.levels(), vec!["root", "module"]);
        let top = shell.top().unwrap();
        assert_ne!(top.id(), first);
        assert_eq!(top.attribute("fullpath").as_deref(), Some("scanners/other"));
    }

    #[test]
    fn test_missing_python_module_is_an_issue() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("entities");
        fs::create_dir_all(&root).unwrap();
        fs::write(
            root.join("pyscan.toml"),
            r#"
                [[command]]
                name = "pyscan"
                level = "root"
                run = "true"
                requirements = { python = ["nonexistent_module_xyz"] }
            "#,
        )
        .unwrap();
        let sources = Sources {
            entities: vec![root],
            ..Sources::default()
        };
        let mut shell = shell_with(&dir, sources);
        assert!(!shell.top().unwrap().has_command("pyscan"));
        let results = shell.play(["show issues"], true);
        let report = results[0].1.as_deref().unwrap();
        assert!(report.contains("pyscan"));
        assert!(report.contains("nonexistent_module_xyz"));
    }

    #[test]
    fn test_start_with_script_reader() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell_with(&dir, Sources::default());
        let mut reader = ScriptReader::new(["help", "set DEBUG false"]);
        shell.start(&mut reader).unwrap();
        assert!(!shell.is_running());
        assert_eq!(reader.prompts().len(), 3);
        assert!(reader.prompts()[0].contains("tk"));
        assert!(shell.app().recorder().root_dir().ends_with("ws"));
    }
}
