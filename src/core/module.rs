// src/core/module.rs

//! Modules: runnable entities with their own options and hooks.

use crate::core::command::CommandContext;
use crate::core::config::{Config, ConfigOption};
use crate::core::entity::Entity;
use crate::core::metadata::OptionDecl;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Behavior of a module. Hooks returning an error count as failed; a failed
/// `prerun` skips the run.
pub trait Module {
    fn run(&mut self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()>;

    fn preload(&mut self, _ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn postload(&mut self, _ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn prerun(&mut self, _ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn postrun(&mut self, _ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The lifecycle hooks a console may run on its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Preload,
    Postload,
    Prerun,
    Postrun,
}

impl Hook {
    /// The hook name, as logged.
    pub fn name(self) -> &'static str {
        match self {
            Self::Preload => "preload",
            Self::Postload => "postload",
            Self::Prerun => "prerun",
            Self::Postrun => "postrun",
        }
    }
}

/// Runs a hook and logs its failure. Returns whether it succeeded.
pub fn run_hook(module: &mut dyn Module, hook: Hook, ctx: &mut CommandContext<'_>) -> bool {
    let result = match hook {
        Hook::Preload => module.preload(ctx),
        Hook::Postload => module.postload(ctx),
        Hook::Prerun => module.prerun(ctx),
        Hook::Postrun => module.postrun(ctx),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            log::debug!("{} failed: {}", hook.name(), e);
            false
        }
    }
}

/// Builds a fresh module instance on each `use`.
pub type ModuleFactory = Rc<dyn Fn() -> Box<dyn Module>>;

/// Registration data of a module: its place in the tree, its options and
/// how to build it.
#[derive(Clone)]
pub struct ModuleClass {
    /// Category path, e.g. `scanners/tcp`.
    pub path: String,
    pub name: String,
    pub options: Vec<OptionDecl>,
    /// Options needing callbacks or choices, declared with their default.
    pub extra_options: Vec<(ConfigOption, Option<String>)>,
    factory: ModuleFactory,
}

impl fmt::Debug for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleClass")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ModuleClass {
    /// A module at `path/name` built by `factory`.
    ///
    /// # Arguments
    ///
    /// * `path` - Category path; empty for top-level modules.
    /// * `name` - Last segment of the full path.
    /// * `factory` - Called on each `use`.
    pub fn new<F>(path: &str, name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + 'static,
    {
        Self {
            path: path.trim_matches('/').to_string(),
            name: name.to_string(),
            options: Vec::new(),
            extra_options: Vec::new(),
            factory: Rc::new(factory),
        }
    }

    /// Adds an option declared from metadata.
    pub fn option(mut self, decl: OptionDecl) -> Self {
        self.options.push(decl);
        self
    }

    /// Adds a fully specified option with its default.
    pub fn config_option(mut self, option: ConfigOption, default: Option<&str>) -> Self {
        self.extra_options.push((option, default.map(str::to_string)));
        self
    }

    /// `path/name`, the identifier used by `use`.
    pub fn fullpath(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// First component of the path.
    pub fn category(&self) -> String {
        self.path.split('/').next().unwrap_or_default().to_string()
    }

    /// The full path without its category.
    pub fn base(&self) -> String {
        let fullpath = self.fullpath();
        match fullpath.split_once('/') {
            Some((_, rest)) => rest.to_string(),
            None => fullpath,
        }
    }

    /// Declares the module's options in its own scope.
    pub fn declare_options(&self, config: &Config) {
        for decl in &self.options {
            decl.declare_in(config);
        }
        for (option, default) in &self.extra_options {
            config.declare(option.clone(), default.as_deref());
        }
    }

    /// A new instance of the module.
    pub fn instantiate(&self) -> Box<dyn Module> {
        (self.factory)()
    }
}

// --- Tree helpers over registered modules ---

/// Case-insensitive search over full path and description.
pub fn search<'a>(modules: impl IntoIterator<Item = &'a Rc<Entity>>, text: &str) -> Vec<Rc<Entity>> {
    let needle = text.to_lowercase();
    modules
        .into_iter()
        .filter(|entity| {
            let description = entity.metadata().description.clone().unwrap_or_default();
            entity.name().to_lowercase().contains(&needle)
                || description.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// Per-category counts: (total, disabled).
pub fn counts<'a>(modules: impl IntoIterator<Item = &'a Rc<Entity>>) -> BTreeMap<String, (usize, usize)> {
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for entity in modules {
        let Some(class) = entity.as_module() else {
            continue;
        };
        let entry = counts.entry(class.category()).or_default();
        entry.0 += 1;
        if !entity.is_enabled() {
            entry.1 += 1;
        }
    }
    counts
}

/// Summary lines such as `-=[ 3 scanners (1 disabled) ]=-`.
pub fn summary<'a>(modules: impl IntoIterator<Item = &'a Rc<Entity>>) -> Vec<String> {
    counts(modules)
        .into_iter()
        .map(|(category, (total, disabled))| {
            let disabled = if disabled > 0 {
                format!(" ({disabled} disabled)")
            } else {
                String::new()
            };
            format!("-=[ {total} {category}{disabled} ]=-")
        })
        .collect()
}
