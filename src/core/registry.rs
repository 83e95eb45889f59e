// src/core/registry.rs

//! The table of every registered entity, indexed by kind, by command level
//! and by module path.

use crate::constants::GENERAL_LEVEL;
use crate::core::entity::{Entity, EntityBody, EntityId, EntityKind};
use crate::core::loader::LoadOptions;
use crate::core::requirements::{CheckContext, IssueCategory, IssueMap, MessageOverrides};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use thiserror::Error;

/// Lookups and removals that name nothing registered.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown entity identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("No console registered for level '{0}'")]
    UnknownLevel(String),
}

/// Restricts an issue listing to one kind, one entity and/or one category.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Only entities of this kind.
    pub kind: Option<EntityKind>,
    pub name: Option<String>,
    /// Only issues of this category.
    pub category: Option<IssueCategory>,
}

/// Issues of one entity, as returned by [`EntityRegistry::issues`].
#[derive(Debug, Clone)]
pub struct EntityIssues {
    pub kind: EntityKind,
    pub name: String,
    pub issues: IssueMap,
    pub messages: MessageOverrides,
}

/// Every loaded entity, indexed by kind and, for commands, modules and
/// consoles, by where they are reachable.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityKind, Vec<Rc<Entity>>>,
    ids: BTreeSet<EntityId>,
    /// level -> name (or alias) -> command
    commands: BTreeMap<String, BTreeMap<String, Rc<Entity>>>,
    /// full path -> module
    modules: BTreeMap<String, Rc<Entity>>,
    /// level -> console class
    consoles: BTreeMap<String, Rc<Entity>>,
}

impl EntityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity. Returns `None` when an entity with the same
    /// identity was already registered.
    pub fn register(&mut self, entity: Entity) -> Option<Rc<Entity>> {
        if self.ids.contains(entity.id()) {
            log::debug!("Skipping duplicate {} '{}'", entity.kind(), entity.name());
            return None;
        }
        let entity = Rc::new(entity);
        self.ids.insert(entity.id().clone());
        match entity.body() {
            EntityBody::Command(class) => {
                for level in &class.levels {
                    let table = self.commands.entry(level.clone()).or_default();
                    for name in class.names() {
                        table.insert(name, entity.clone());
                    }
                }
            }
            EntityBody::Module(class) => {
                self.modules.insert(class.fullpath(), entity.clone());
            }
            EntityBody::Console(class) => {
                self.consoles.insert(class.level.clone(), entity.clone());
            }
            EntityBody::Model(_) | EntityBody::StoreExtension(_) => {}
        }
        self.entities
            .entry(entity.kind())
            .or_default()
            .push(entity.clone());
        log::debug!("Registered {} '{}'", entity.kind(), entity.name());
        Some(entity)
    }

    /// Removes an entity from every table. Returns whether it was registered.
    pub fn unregister(&mut self, entity: &Rc<Entity>) -> bool {
        if !self.ids.remove(entity.id()) {
            return false;
        }
        if let Some(list) = self.entities.get_mut(&entity.kind()) {
            list.retain(|e| !Rc::ptr_eq(e, entity));
        }
        for table in self.commands.values_mut() {
            table.retain(|_, e| !Rc::ptr_eq(e, entity));
        }
        self.commands.retain(|_, table| !table.is_empty());
        self.modules.retain(|_, e| !Rc::ptr_eq(e, entity));
        self.consoles.retain(|_, e| !Rc::ptr_eq(e, entity));
        log::debug!("Unregistered {} '{}'", entity.kind(), entity.name());
        true
    }

    /// Unregisters by identifier: `command/<name>`, `command/<level>/<name>`,
    /// `module/<fullpath>`, `model/<name>`, `store_extension/<name>` or
    /// `console/<level>`. Returns how many entities were removed.
    pub fn unregister_by_identifier(&mut self, identifier: &str) -> Result<usize, RegistryError> {
        let unknown = || RegistryError::UnknownIdentifier(identifier.to_string());
        let (kind, rest) = identifier.split_once('/').ok_or_else(unknown)?;
        let kind = EntityKind::parse(kind).ok_or_else(unknown)?;

        let targets: Vec<Rc<Entity>> = match kind {
            EntityKind::Command => match rest.split_once('/') {
                Some((level, name)) => self
                    .commands
                    .get(level)
                    .and_then(|table| table.get(name))
                    .cloned()
                    .into_iter()
                    .collect(),
                None => self.entities_of(EntityKind::Command)
                    .iter()
                    .filter(|e| e.as_command().is_some_and(|c| c.names().iter().any(|n| n == rest)))
                    .cloned()
                    .collect(),
            },
            EntityKind::Module => self.modules.get(rest).cloned().into_iter().collect(),
            EntityKind::Console => self.consoles.get(rest).cloned().into_iter().collect(),
            other => self
                .entities_of(other)
                .iter()
                .filter(|e| e.name() == rest)
                .cloned()
                .collect(),
        };
        Ok(targets.iter().filter(|e| self.unregister(e)).count())
    }

    /// Whether an entity with identity `id` is registered.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.ids.contains(id)
    }

    /// Entities of one kind, in registration order.
    pub fn entities_of(&self, kind: EntityKind) -> &[Rc<Entity>] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every entity, grouped by kind.
    pub fn all(&self) -> impl Iterator<Item = &Rc<Entity>> {
        self.entities.values().flatten()
    }

    /// The registered entity with identity `id`.
    pub fn find(&self, id: &EntityId) -> Option<&Rc<Entity>> {
        self.all().find(|e| e.id() == id)
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Levels that have at least one command.
    pub fn levels(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Commands reachable at `level`: general ones first, then the level's
    /// own, which take precedence on name clashes.
    pub fn commands_for(&self, level: &str) -> Vec<(String, Rc<Entity>)> {
        let mut merged: BTreeMap<String, Rc<Entity>> = BTreeMap::new();
        for key in [GENERAL_LEVEL, level] {
            if let Some(table) = self.commands.get(key) {
                for (name, entity) in table {
                    merged.insert(name.clone(), entity.clone());
                }
            }
        }
        merged.into_iter().collect()
    }

    /// The command registered under `name` at exactly `level`.
    pub fn command(&self, level: &str, name: &str) -> Option<Rc<Entity>> {
        self.commands.get(level).and_then(|t| t.get(name)).cloned()
    }

    /// The module at `fullpath`.
    pub fn module(&self, fullpath: &str) -> Option<Rc<Entity>> {
        self.modules.get(fullpath).cloned()
    }

    /// Every module, by full path.
    pub fn modules(&self) -> impl Iterator<Item = &Rc<Entity>> {
        self.modules.values()
    }

    /// The console class of `level`.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::UnknownLevel`] if none is registered.
    pub fn console_class(&self, level: &str) -> Result<Rc<Entity>, RegistryError> {
        self.consoles
            .get(level)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownLevel(level.to_string()))
    }

    /// Checks every entity; returns whether all are active.
    pub fn check_all(&self, ctx: &CheckContext<'_>) -> bool {
        self.all().fold(true, |good, e| e.check(ctx) && good)
    }

    /// Removes entities whose load condition does not hold.
    pub fn apply_conditions(&mut self, options: &LoadOptions) -> usize {
        let failing: Vec<Rc<Entity>> = self.all().filter(|e| !e.condition_holds(options)).cloned().collect();
        failing.iter().filter(|e| self.unregister(e)).count()
    }

    /// Entities with issues from their last check, matching `filter`.
    pub fn issues(&self, filter: &IssueFilter) -> Vec<EntityIssues> {
        self.all()
            .filter(|e| filter.kind.is_none_or(|k| e.kind() == k))
            .filter(|e| filter.name.as_deref().is_none_or(|n| e.name() == n))
            .filter_map(|e| {
                let mut issues = e.issues();
                if let Some(category) = filter.category {
                    issues.retain(|c, _| *c == category);
                }
                (!issues.is_empty()).then(|| EntityIssues {
                    kind: e.kind(),
                    name: e.name().to_string(),
                    issues,
                    messages: e.requirements().messages.clone(),
                })
            })
            .collect()
    }

    /// Whether [`EntityRegistry::issues`] would report anything.
    pub fn has_issues(&self, filter: &IssueFilter) -> bool {
        !self.issues(filter).is_empty()
    }

    /// Renders issues, grouping entities that share identical issues:
    ///
    /// ```text
    /// Commands: a, b
    /// - 'x' tool is not installed
    /// ```
    pub fn render_issues(&self, filter: &IssueFilter) -> String {
        let mut groups: Vec<(IssueMap, MessageOverrides, BTreeMap<EntityKind, BTreeSet<String>>)> =
            Vec::new();
        for item in self.issues(filter) {
            match groups.iter_mut().find(|(issues, _, _)| *issues == item.issues) {
                Some((_, _, names)) => {
                    names.entry(item.kind).or_default().insert(item.name);
                }
                None => {
                    let mut names = BTreeMap::new();
                    names.insert(item.kind, BTreeSet::from([item.name]));
                    groups.push((item.issues, item.messages, names));
                }
            }
        }

        let mut blocks = Vec::new();
        for (issues, messages, names) in groups {
            let mut block = String::new();
            for (kind, entities) in names {
                let list: Vec<String> = entities.into_iter().collect();
                block.push_str(&format!("{}: {}\n", kind.label(list.len() > 1), list.join(", ")));
            }
            for issue in issues.values().flatten() {
                block.push_str(&format!("- {}\n", issue.message(&messages)));
            }
            blocks.push(block);
        }
        blocks.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::{Command, CommandClass, CommandContext, CommandError, Outcome};
    use crate::core::requirements::Requirements;
    use crate::state::StateStore;

    struct Nop;
    impl Command for Nop {
        fn run(&mut self, _: &mut CommandContext<'_>, _: &[String]) -> Result<Outcome, CommandError> {
            Ok(Outcome::Done)
        }
    }

    fn command(name: &str, levels: &[&str]) -> Entity {
        Entity::command(
            format!("/plugins/{name}.toml"),
            CommandClass::new(name, || Box::new(Nop)).levels(levels),
        )
    }

    fn check(registry: &EntityRegistry) {
        let state = StateStore::default();
        let attributes = BTreeMap::new();
        registry.check_all(&CheckContext {
            config: None,
            state: &state,
            attributes: &attributes,
        });
    }

    #[test]
    fn test_register_deduplicates_by_identity() {
        let mut registry = EntityRegistry::new();
        assert!(registry.register(command("show", &["general"])).is_some());
        assert!(registry.register(command("show", &["general"])).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_commands_for_merges_general_and_level() {
        let mut registry = EntityRegistry::new();
        registry.register(command("help", &["general"]));
        registry.register(command("use", &["root", "project"]));
        registry.register(command("run", &["module"]));

        let root: Vec<String> = registry.commands_for("root").into_iter().map(|(n, _)| n).collect();
        assert_eq!(root, vec!["help", "use"]);
        let module: Vec<String> = registry.commands_for("module").into_iter().map(|(n, _)| n).collect();
        assert_eq!(module, vec!["help", "run"]);
        assert_eq!(registry.levels(), vec!["general", "module", "project", "root"]);
    }

    #[test]
    fn test_unregister_by_identifier() {
        let mut registry = EntityRegistry::new();
        registry.register(command("use", &["root", "project"]));
        registry.register(command("help", &["general"]));

        assert_eq!(registry.unregister_by_identifier("command/root/use").unwrap(), 1);
        assert!(registry.command("project", "use").is_none());
        assert_eq!(registry.unregister_by_identifier("command/help").unwrap(), 1);
        assert!(registry.is_empty());
        assert!(registry.levels().is_empty());
        assert!(registry.unregister_by_identifier("nonsense").is_err());
    }

    #[test]
    fn test_issues_reenable_after_requirement_removal() {
        // --- Setup ---
        let mut registry = EntityRegistry::new();
        let failing = registry
            .register(
                command("pyonly", &["general"])
                    .requires(Requirements::default().python("nonexistent_module_xyz").unwrap()),
            )
            .unwrap();
        check(&registry);

        // --- Assert: disabled and reported under python ---
        assert!(!failing.is_enabled());
        let filter = IssueFilter {
            category: Some(IssueCategory::Python),
            ..IssueFilter::default()
        };
        let issues = registry.issues(&filter);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].name, "pyonly");

        // --- Execute: drop the requirement in place ---
        failing.set_requirements(Requirements::default());
        check(&registry);
        assert!(failing.is_enabled());
        assert!(!registry.has_issues(&IssueFilter::default()));
    }

    #[test]
    fn test_render_issues_groups_identical_errors() {
        let mut registry = EntityRegistry::new();
        let req = || Requirements::default().system("tierkit-missing-tool").unwrap();
        registry.register(command("alpha", &["general"]).requires(req()));
        registry.register(command("beta", &["general"]).requires(req()));
        registry.register(
            command("gamma", &["general"])
                .requires(Requirements::default().python("nonexistent_module_xyz").unwrap()),
        );
        check(&registry);

        let text = registry.render_issues(&IssueFilter::default());
        assert!(text.contains("Commands: alpha, beta\n- 'tierkit-missing-tool' tool is not installed"));
        assert!(text.contains("Command: gamma\n- 'nonexistent_module_xyz' Python package is not installed"));
    }

    #[test]
    fn test_apply_conditions() {
        let mut registry = EntityRegistry::new();
        registry.register(command("kept", &["general"]));
        registry.register(command("dropped", &["general"]).when(|_| false));
        assert_eq!(registry.apply_conditions(&LoadOptions::default()), 1);
        assert!(registry.command("general", "dropped").is_none());
        assert!(registry.command("general", "kept").is_some());
    }
}
