// src/cli/commands/general.rs

//! Commands attached at every level: help, exit, back, search and show.

use super::{builtin, expect_member};
use crate::constants::{GENERAL_LEVEL, ROOT_LEVEL, SESSION_LEVEL};
use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome, Signature};
use crate::core::config::Config;
use crate::core::entity::Entity;
use crate::core::module;
use crate::core::registry::IssueFilter;
use crate::core::requirements::IssueCategory;
use crate::system::output::{Table, yes_no};
use std::collections::BTreeSet;
use std::rc::Rc;

pub(super) fn entities() -> Vec<Entity> {
    vec![
        builtin(file!(), CommandClass::new("help", || Box::new(Help)).alias("?"), "Display help"),
        builtin(
            file!(),
            CommandClass::new("exit", || Box::new(Exit))
                .alias("quit")
                .except(&[SESSION_LEVEL]),
            "Exit the console",
        ),
        builtin(
            file!(),
            CommandClass::new("back", || Box::new(Exit)).except(&[ROOT_LEVEL, SESSION_LEVEL]),
            "Come back to the previous console level",
        ),
        builtin(
            file!(),
            CommandClass::new("search", || Box::new(Search))
                .except(&[SESSION_LEVEL])
                .single_arg(),
            "Search for text in modules",
        ),
        builtin(
            file!(),
            CommandClass::new("show", || Box::new(Show)),
            "Show options, modules, issues, state or module information",
        ),
    ]
}

// --- help ---

struct Help;

/// Name shown for an attached command: its own name when reachable.
fn display_name(entity: &Entity, names: &[String]) -> String {
    let own = entity.name().to_string();
    if names.contains(&own) {
        own
    } else {
        names.first().cloned().unwrap_or(own)
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Command for Help {
    fn run(&mut self, ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        let mut general = Table::new(&["Command", "Description"]).title("General commands");
        let mut specific =
            Table::new(&["Command", "Description"]).title(format!("{} commands", capitalize(ctx.console.level())));
        let mut rows: Vec<(bool, String, String)> = ctx
            .console
            .attached()
            .into_iter()
            .filter_map(|(entity, names)| {
                let class = entity.as_command()?;
                let is_general = class.levels.iter().any(|l| l == GENERAL_LEVEL);
                let description = entity.metadata().description.clone().unwrap_or_default();
                Some((is_general, display_name(&entity, &names), description))
            })
            .collect();
        rows.sort();
        for (is_general, name, description) in rows {
            let table = if is_general { &mut general } else { &mut specific };
            table.row([name, description]);
        }
        for table in [general, specific] {
            if !table.is_empty() {
                ctx.out().print(&table.render());
            }
        }
        Ok(Outcome::Done)
    }
}

// --- exit / back ---

struct Exit;

impl Command for Exit {
    fn run(&mut self, _ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, CommandError> {
        Ok(Outcome::Exit)
    }
}

// --- search ---

struct Search;

impl Command for Search {
    fn signature(&self) -> Signature {
        Signature::niladic().required("text")
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let text = args.first().map(String::as_str).unwrap_or_default();
        let keywords = shlex::split(text).unwrap_or_else(|| vec![text.to_string()]);
        let mut matches: Vec<Rc<Entity>> = Vec::new();
        for keyword in &keywords {
            for entity in module::search(ctx.app.registry().modules(), keyword) {
                if !matches.iter().any(|m| Rc::ptr_eq(m, &entity)) {
                    matches.push(entity);
                }
            }
        }
        if matches.is_empty() {
            log::error!("No match found");
            return Ok(Outcome::Done);
        }
        let mut table = Table::new(&["Name", "Path", "Description"]).title("Matching modules");
        for entity in &matches {
            if let Some(class) = entity.as_module() {
                table.row([
                    class.name.clone(),
                    class.path.clone(),
                    entity.metadata().description.clone().unwrap_or_default(),
                ]);
            }
        }
        ctx.out().print(&table.render());
        let n = matches.len();
        log::info!("{} match{} found", n, if n > 1 { "es" } else { "" });
        Ok(Outcome::Done)
    }
}

// --- show ---

struct Show;

/// Renders one scope as an options table, optionally restricted to `key`.
pub(super) fn options_table(scope: &Config, key: Option<&str>) -> Table {
    let mut table = Table::new(&["Name", "Value", "Required", "Description"]).title(scope.title());
    for row in scope.items() {
        if key.is_some_and(|k| k != row.name) {
            continue;
        }
        table.row([row.name, row.value, yes_no(row.required).to_string(), row.description]);
    }
    table
}

impl Show {
    fn keys(ctx: &CommandContext<'_>) -> Vec<String> {
        let mut keys = vec!["modules".to_string(), "options".to_string(), "state".to_string()];
        if ctx.app.registry().has_issues(&IssueFilter::default()) {
            keys.push("issues".to_string());
        }
        if ctx.console.module().is_some() {
            keys.push("info".to_string());
        }
        keys.sort();
        keys
    }

    fn show_options(ctx: &CommandContext<'_>, key: Option<&str>) {
        for scope in ctx.config().scopes() {
            let table = options_table(scope, key);
            if !table.is_empty() {
                ctx.out().print(&table.render());
            }
        }
    }

    fn show_modules(ctx: &CommandContext<'_>, category: Option<&str>) {
        let mut table = Table::new(&["Name", "Path", "Enabled", "Description"]).title(match category {
            Some(c) => format!("Modules ({c})"),
            None => "Modules".to_string(),
        });
        for entity in ctx.app.registry().modules() {
            let Some(class) = entity.as_module() else {
                continue;
            };
            if category.is_some_and(|c| c != class.category()) {
                continue;
            }
            table.row([
                class.name.clone(),
                class.path.clone(),
                yes_no(entity.is_enabled()).to_string(),
                entity.metadata().description.clone().unwrap_or_default(),
            ]);
        }
        if table.is_empty() {
            log::warn!("No module loaded");
        } else {
            ctx.out().print(&table.render());
        }
    }

    fn show_issues(ctx: &CommandContext<'_>, category: Option<&str>) {
        let filter = IssueFilter {
            category: category.and_then(IssueCategory::parse),
            ..IssueFilter::default()
        };
        let report = ctx.app.registry().render_issues(&filter);
        if !report.is_empty() {
            ctx.out().println(&report);
        }
    }

    fn show_state(ctx: &CommandContext<'_>) {
        let mut table = Table::headless().title("Shared state");
        for (key, value) in ctx.app.state().read().iter() {
            table.row([key.clone(), value.to_string()]);
        }
        if table.is_empty() {
            log::info!("The shared state is empty");
        } else {
            ctx.out().print(&table.render());
        }
    }

    fn show_info(ctx: &CommandContext<'_>) {
        let Some(slot) = ctx.console.module() else {
            log::warn!("No module loaded");
            return;
        };
        let mut table = Table::headless().title("Module information");
        let fullpath = slot.class().map(|c| c.fullpath()).unwrap_or_default();
        for (label, value) in slot.entity().metadata().info_rows(&fullpath) {
            table.row([label, value]);
        }
        ctx.out().print(&table.render());
        let options = options_table(slot.config(), None);
        if !options.is_empty() {
            ctx.out().print(&options.render());
        }
    }
}

impl Command for Show {
    fn signature(&self) -> Signature {
        Signature::niladic().required("key").optional("value", None)
    }

    fn complete_keys(&self, ctx: &CommandContext<'_>) -> Vec<String> {
        Self::keys(ctx)
    }

    fn complete_values(&self, ctx: &CommandContext<'_>, key: Option<&str>) -> Vec<String> {
        match key {
            Some("options") => ctx.config().keys(false),
            Some("modules") => module::counts(ctx.app.registry().modules()).into_keys().collect(),
            Some("issues") => {
                let categories: BTreeSet<&'static str> = ctx
                    .app
                    .registry()
                    .issues(&IssueFilter::default())
                    .iter()
                    .flat_map(|item| item.issues.keys().map(|c| c.as_str()).collect::<Vec<_>>())
                    .collect();
                categories.into_iter().map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }

    fn validate(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<(), CommandError> {
        let signature = self.signature();
        let Some((key, rest)) = args.split_first().filter(|_| args.len() <= signature.max()) else {
            return Err(CommandError::Arity {
                expected: signature.expected(),
                given: args.len(),
            });
        };
        expect_member(&Self::keys(ctx), key, "invalid key")?;
        match (key.as_str(), rest.first()) {
            (_, None) => Ok(()),
            ("options", Some(value)) => expect_member(&self.complete_values(ctx, Some(key.as_str())), value, "invalid option"),
            ("modules", Some(value)) => expect_member(&self.complete_values(ctx, Some(key.as_str())), value, "invalid category"),
            ("issues", Some(value)) => expect_member(&self.complete_values(ctx, Some(key.as_str())), value, "invalid error type"),
            (_, Some(_)) => Err(CommandError::invalid("this key takes no value")),
        }
    }

    fn run(&mut self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, CommandError> {
        let value = args.get(1).map(String::as_str);
        match args.first().map(String::as_str) {
            Some("options") => Self::show_options(ctx, value),
            Some("modules") => Self::show_modules(ctx, value),
            Some("issues") => Self::show_issues(ctx, value),
            Some("state") => Self::show_state(ctx),
            Some("info") => Self::show_info(ctx),
            _ => return Err(CommandError::invalid("invalid key")),
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConfigOption, GlobalOptions};

    #[test]
    fn test_options_table_filters_by_key() {
        let config = Config::new("Main options", &GlobalOptions::default());
        config.declare(ConfigOption::new("DEBUG").description("Debug mode").required(true), Some("false"));
        config.declare(ConfigOption::new("WORKSPACE").description("Results"), None);
        let rendered = options_table(&config, Some("DEBUG")).render();
        assert!(rendered.contains("Main options"));
        assert!(rendered.contains("DEBUG"));
        assert!(rendered.contains("false"));
        assert!(!rendered.contains("WORKSPACE"));
        assert_eq!(options_table(&config, None).render().matches("  DEBUG").count(), 1);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("root"), "Root");
        assert_eq!(capitalize(""), "");
    }
}
