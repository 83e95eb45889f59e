// src/core/entity.rs

//! Registrable plugin kinds and their check status.

use crate::core::command::CommandClass;
use crate::core::console::ConsoleClass;
use crate::core::loader::LoadOptions;
use crate::core::metadata::Metadata;
use crate::core::module::ModuleClass;
use crate::core::requirements::{CheckContext, IssueMap, Requirements};
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The registrable plugin kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// Console commands.
    Command,
    /// Runnable modules.
    Module,
    /// Console levels.
    Console,
    /// Declarative data models.
    Model,
    /// Declarative store extensions.
    StoreExtension,
}

impl EntityKind {
    /// Every kind, in report order.
    pub const ALL: [Self; 5] = [
        Self::Command,
        Self::Module,
        Self::Console,
        Self::Model,
        Self::StoreExtension,
    ];

    /// The identifier prefix, e.g. `command`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Module => "module",
            Self::Console => "console",
            Self::Model => "model",
            Self::StoreExtension => "store_extension",
        }
    }

    /// Plural label used in reports, e.g. `Commands`.
    pub fn label(self, plural: bool) -> &'static str {
        match (self, plural) {
            (Self::Command, false) => "Command",
            (Self::Command, true) => "Commands",
            (Self::Module, false) => "Module",
            (Self::Module, true) => "Modules",
            (Self::Console, false) => "Console",
            (Self::Console, true) => "Consoles",
            (Self::Model, false) => "Model",
            (Self::Model, true) => "Models",
            (Self::StoreExtension, false) => "StoreExtension",
            (Self::StoreExtension, true) => "StoreExtensions",
        }
    }

    /// The kind named by [`EntityKind::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// De-duplication key: normalized source file plus declared name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    /// The defining file.
    pub source: PathBuf,
    /// The declared name.
    pub name: String,
}

/// Declarative entities with no behavior of their own (models, store extensions).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Declared name.
    pub name: String,
    /// Free-form fields.
    pub fields: BTreeMap<String, String>,
}

/// The kind-specific part of an entity.
#[derive(Debug)]
pub enum EntityBody {
    /// A command class.
    Command(CommandClass),
    /// A module class.
    Module(ModuleClass),
    /// A console class.
    Console(ConsoleClass),
    /// A model descriptor.
    Model(Descriptor),
    /// A store extension descriptor.
    StoreExtension(Descriptor),
}

impl EntityBody {
    /// The kind of this body.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Command(_) => EntityKind::Command,
            Self::Module(_) => EntityKind::Module,
            Self::Console(_) => EntityKind::Console,
            Self::Model(_) => EntityKind::Model,
            Self::StoreExtension(_) => EntityKind::StoreExtension,
        }
    }

    fn name(&self) -> String {
        match self {
            Self::Command(c) => c.name.clone(),
            Self::Module(m) => m.fullpath(),
            Self::Console(c) => c.level.clone(),
            Self::Model(d) | Self::StoreExtension(d) => d.name.clone(),
        }
    }
}

/// An applicability gate: the dotted attribute `path` must equal `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicabilityRule {
    /// Dotted console attribute, e.g. `console.module.fullpath`.
    pub path: String,
    /// Expected value.
    pub value: String,
}

/// Decides at load time, from the load options, whether an entity stays.
pub type LoadCondition = Rc<dyn Fn(&LoadOptions) -> bool>;

#[derive(Debug, Clone, Default)]
struct EntityStatus {
    checked: bool,
    enabled: bool,
    applicable: bool,
    issues: IssueMap,
}

/// A registered plugin: identity, metadata, gates and kind-specific body.
pub struct Entity {
    id: EntityId,
    metadata: Metadata,
    requirements: RefCell<Requirements>,
    applies_to: Vec<ApplicabilityRule>,
    condition: Option<LoadCondition>,
    status: RefCell<EntityStatus>,
    body: EntityBody,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("requirements", &self.requirements)
            .field("applies_to", &self.applies_to)
            .finish_non_exhaustive()
    }
}

impl Entity {
    /// An entity defined in `source`, named after its body, with no
    /// requirement, gate or condition.
    ///
    /// # Arguments
    ///
    /// * `source` - The defining file; `file!()` for compiled plugins.
    /// * `body` - The kind-specific class or descriptor.
    pub fn new(source: impl Into<PathBuf>, body: EntityBody) -> Self {
        Self {
            id: EntityId {
                source: source.into(),
                name: body.name(),
            },
            metadata: Metadata::default(),
            requirements: RefCell::new(Requirements::default()),
            applies_to: Vec::new(),
            condition: None,
            status: RefCell::new(EntityStatus::default()),
            body,
        }
    }

    /// A command entity.
    pub fn command(source: impl Into<PathBuf>, class: CommandClass) -> Self {
        Self::new(source, EntityBody::Command(class))
    }

    /// A module entity.
    pub fn module(source: impl Into<PathBuf>, class: ModuleClass) -> Self {
        Self::new(source, EntityBody::Module(class))
    }

    /// A console class entity.
    pub fn console(source: impl Into<PathBuf>, class: ConsoleClass) -> Self {
        Self::new(source, EntityBody::Console(class))
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the requirements evaluated by each check.
    pub fn requires(mut self, requirements: Requirements) -> Self {
        self.requirements = RefCell::new(requirements);
        self
    }

    /// Only applies when the attribute at `path` equals `value`.
    pub fn applies_to(mut self, path: &str, value: &str) -> Self {
        self.applies_to.push(ApplicabilityRule {
            path: path.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Kept at load time only if `condition` holds for the load options.
    pub fn when(mut self, condition: impl Fn(&LoadOptions) -> bool + 'static) -> Self {
        self.condition = Some(Rc::new(condition));
        self
    }

    /// The identity used for de-duplication.
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The declared name; the full path for modules.
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The defining file.
    pub fn source(&self) -> &Path {
        &self.id.source
    }

    /// The kind of the entity.
    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    /// The kind-specific body.
    pub fn body(&self) -> &EntityBody {
        &self.body
    }

    /// Descriptive metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Metadata, while the entity is still being built.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The current requirements.
    pub fn requirements(&self) -> Ref<'_, Requirements> {
        self.requirements.borrow()
    }

    /// Replaces the requirements of a registered entity. The new ones are
    /// evaluated by the next check.
    pub fn set_requirements(&self, requirements: Requirements) {
        *self.requirements.borrow_mut() = requirements;
    }

    /// The command class, for command entities.
    pub fn as_command(&self) -> Option<&CommandClass> {
        match &self.body {
            EntityBody::Command(c) => Some(c),
            _ => None,
        }
    }

    /// The module class, for module entities.
    pub fn as_module(&self) -> Option<&ModuleClass> {
        match &self.body {
            EntityBody::Module(m) => Some(m),
            _ => None,
        }
    }

    /// The console class, for console entities.
    pub fn as_console(&self) -> Option<&ConsoleClass> {
        match &self.body {
            EntityBody::Console(c) => Some(c),
            _ => None,
        }
    }

    /// Whether the load condition, if any, holds for `options`.
    pub fn condition_holds(&self, options: &LoadOptions) -> bool {
        self.condition.as_ref().is_none_or(|c| c(options))
    }

    /// Evaluates requirements and applicability, caching the result.
    /// Returns whether the entity is active (enabled and applicable).
    pub fn check(&self, ctx: &CheckContext<'_>) -> bool {
        let (enabled, issues) = self.requirements.borrow().evaluate(self.source(), ctx);
        let applicable = self.applies_to.is_empty()
            || self
                .applies_to
                .iter()
                .any(|rule| ctx.attributes.lookup(&rule.path).as_deref() == Some(rule.value.as_str()));
        log::debug!(
            "Checked {} '{}': enabled={}, applicable={}",
            self.kind(),
            self.name(),
            enabled,
            applicable
        );
        *self.status.borrow_mut() = EntityStatus {
            checked: true,
            enabled,
            applicable,
            issues,
        };
        enabled && applicable
    }

    /// Whether a check ran at least once.
    pub fn is_checked(&self) -> bool {
        self.status.borrow().checked
    }

    /// Whether the requirements held at the last check.
    pub fn is_enabled(&self) -> bool {
        self.status.borrow().enabled
    }

    /// Whether an applicability rule matched at the last check.
    pub fn is_applicable(&self) -> bool {
        self.status.borrow().applicable
    }

    /// Enabled and applicable.
    pub fn is_active(&self) -> bool {
        let status = self.status.borrow();
        status.enabled && status.applicable
    }

    /// Issues found by the last check.
    pub fn issues(&self) -> IssueMap {
        self.status.borrow().issues.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::requirements::IssueCategory;
    use crate::state::StateStore;
    use serde_json::json;

    fn model(name: &str) -> Entity {
        Entity::new(
            "/plugins/models.toml",
            EntityBody::Model(Descriptor {
                name: name.to_string(),
                fields: BTreeMap::new(),
            }),
        )
    }

    #[test]
    fn test_identity_and_kind() {
        let entity = model("host");
        assert_eq!(entity.kind(), EntityKind::Model);
        assert_eq!(entity.name(), "host");
        assert_eq!(entity.source(), Path::new("/plugins/models.toml"));
        assert!(!entity.is_checked());
    }

    #[test]
    fn test_check_records_status_and_issues() {
        let entity = model("needs_python")
            .requires(Requirements::default().python("nonexistent_module_xyz").unwrap());
        let state = StateStore::default();
        let attributes = BTreeMap::new();
        let ctx = CheckContext {
            config: None,
            state: &state,
            attributes: &attributes,
        };

        assert!(!entity.check(&ctx));
        assert!(entity.is_checked());
        assert!(!entity.is_enabled());
        assert!(entity.issues().contains_key(&IssueCategory::Python));
    }

    #[test]
    fn test_applicability_gate() {
        let entity = model("scoped").applies_to("console.module.fullpath", "scanners/tcp");
        let state = StateStore::default();
        let mut attributes = BTreeMap::new();
        let ctx = CheckContext {
            config: None,
            state: &state,
            attributes: &attributes,
        };
        assert!(!entity.check(&ctx));
        assert!(entity.is_enabled());
        assert!(!entity.is_applicable());

        attributes.insert("console.module.fullpath".to_string(), "scanners/tcp".to_string());
        let ctx = CheckContext {
            config: None,
            state: &state,
            attributes: &attributes,
        };
        assert!(entity.check(&ctx));
        assert!(entity.is_active());
    }

    #[test]
    fn test_state_requirement_toggles_with_state() {
        let entity = model("stateful")
            .requires(Requirements::default().state("TARGETS", crate::core::requirements::StateExpectation::Present));
        let state = StateStore::default();
        let attributes = BTreeMap::new();
        let ctx = CheckContext {
            config: None,
            state: &state,
            attributes: &attributes,
        };
        assert!(!entity.check(&ctx));
        state.insert("TARGETS", json!(["10.0.0.1"]));
        assert!(entity.check(&ctx));
    }

    #[test]
    fn test_load_condition() {
        let options = LoadOptions::default();
        assert!(model("plain").condition_holds(&options));
        assert!(!model("never").when(|_| false).condition_holds(&options));
        let dev_only = model("dev").when(|o| o.dev);
        assert!(!dev_only.condition_holds(&options));
        assert!(dev_only.condition_holds(&LoadOptions {
            dev: true,
            ..LoadOptions::default()
        }));
    }
}
