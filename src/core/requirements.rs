// src/core/requirements.rs

//! Requirement declarations and their evaluation.
//!
//! Every failure is recorded as an [`Issue`] instead of being raised, so that
//! a failing entity is simply disabled and reported on demand.

use crate::core::config::{ProxyConfig, Value};
use crate::state::StateStore;
use crate::system::paths;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

/// A requirement declaration that could not be parsed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequirementError {
    #[error("Unknown requirements type '{0}'")]
    UnknownType(String),
    #[error("Bad {category} requirements: {reason}")]
    Malformed { category: String, reason: String },
}

// --- Check context ---

/// Resolves dotted attribute paths such as `console.module.fullpath`.
pub trait AttributeSource {
    fn lookup(&self, path: &str) -> Option<String>;
}

impl AttributeSource for BTreeMap<String, String> {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

/// Everything a requirement check may consult.
pub struct CheckContext<'a> {
    /// Options of the checking console; `None` at load time.
    pub config: Option<&'a ProxyConfig>,
    /// The shared state.
    pub state: &'a StateStore,
    /// Console attributes consulted by applicability rules.
    pub attributes: &'a dyn AttributeSource,
}

impl fmt::Debug for CheckContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckContext")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// --- Issues ---

/// The requirement families, also used to filter issue listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IssueCategory {
    Config,
    File,
    Python,
    Tools,
    Packages,
    State,
}

impl IssueCategory {
    /// Lowercase name, as used in manifests and `show issues`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::File => "file",
            Self::Python => "python",
            Self::Tools => "tools",
            Self::Packages => "packages",
            Self::State => "state",
        }
    }

    /// The category named by [`IssueCategory::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "config" => Some(Self::Config),
            "file" => Some(Self::File),
            "python" => Some(Self::Python),
            "tools" => Some(Self::Tools),
            "packages" => Some(Self::Packages),
            "state" => Some(Self::State),
            _ => None,
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed requirement. `negated` means the requirement asked for absence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Issue {
    Config { option: String, expected: String, negated: bool },
    File { path: String, negated: bool },
    Python { package: String, negated: bool },
    Tool { tool: String, negated: bool },
    Package { package: String, negated: bool },
    StateMissing { key: String },
    StateMismatch { key: String, expected: String },
    StateAbsent { key: String, expected: String },
}

impl Issue {
    /// The family of the failed requirement.
    pub fn category(&self) -> IssueCategory {
        match self {
            Self::Config { .. } => IssueCategory::Config,
            Self::File { .. } => IssueCategory::File,
            Self::Python { .. } => IssueCategory::Python,
            Self::Tool { .. } => IssueCategory::Tools,
            Self::Package { .. } => IssueCategory::Packages,
            Self::StateMissing { .. } | Self::StateMismatch { .. } | Self::StateAbsent { .. } => {
                IssueCategory::State
            }
        }
    }

    /// The item a custom message is looked up by.
    pub fn subject(&self) -> &str {
        match self {
            Self::Config { option, .. } => option,
            Self::File { path, .. } => path,
            Self::Python { package, .. } | Self::Package { package, .. } => package,
            Self::Tool { tool, .. } => tool,
            Self::StateMissing { key }
            | Self::StateMismatch { key, .. }
            | Self::StateAbsent { key, .. } => key,
        }
    }

    /// Short form used in custom messages: `KEY`, `KEY=value` or `KEY?value`.
    pub fn item(&self) -> String {
        match self {
            Self::StateMismatch { key, expected } => format!("{key}={expected}"),
            Self::StateAbsent { key, expected } => format!("{key}?{expected}"),
            other => other.subject().to_string(),
        }
    }

    /// Renders the issue, preferring a custom template where `{}` is the item.
    pub fn message(&self, overrides: &MessageOverrides) -> String {
        if let Some(template) = overrides
            .get(&self.category())
            .and_then(|m| m.get(self.subject()))
        {
            return template.replace("{}", &self.item());
        }
        let not = |negated: &bool| if *negated { "" } else { "not " };
        match self {
            Self::Config { option, expected, negated } => {
                format!("'{option}' option is {}set to '{expected}'", not(negated))
            }
            Self::File { path, negated } => format!("'{path}' {}found", not(negated)),
            Self::Python { package, negated } => {
                format!("'{package}' Python package is {}installed", not(negated))
            }
            Self::Tool { tool, negated } => format!("'{tool}' tool is {}installed", not(negated)),
            Self::Package { package, negated } => {
                format!("'{package}' system package is {}installed", not(negated))
            }
            Self::StateMissing { key } => format!("'{key}' state key is not defined"),
            Self::StateMismatch { key, expected } => {
                format!("'{key}' state key does not match the expected value '{expected}'")
            }
            Self::StateAbsent { key, expected } => {
                format!("'{key}' state key is expected to have value '{expected}' at least once")
            }
        }
    }
}

/// Custom issue messages: category, then subject, then template.
pub type MessageOverrides = BTreeMap<IssueCategory, BTreeMap<String, String>>;

/// Accumulated failures of one entity, sorted and de-duplicated per category.
pub type IssueMap = BTreeMap<IssueCategory, BTreeSet<Issue>>;

// --- Requirement declarations ---

/// Splits a leading `!` negation marker.
fn unpack_negation(item: &str) -> (bool, &str) {
    match item.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, item),
    }
}

/// An option that must (or must not) hold a value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRequirement {
    pub option: String,
    pub expected: String,
    pub negated: bool,
}

/// A file that must (or must not) exist next to the entity's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequirement {
    pub path: String,
    pub negated: bool,
}

/// A resolvable name plus the human-facing package name reported on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequirement {
    pub name: String,
    pub package: Option<String>,
    pub negated: bool,
}

impl LookupRequirement {
    /// Parses `name`, `!name`, `package/name` or `!package/name`.
    pub fn parse(category: &str, spec: &str) -> Result<Self, RequirementError> {
        let (negated, rest) = unpack_negation(spec.trim());
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self {
                name: (*name).to_string(),
                package: None,
                negated,
            }),
            [package, name] if !package.is_empty() && !name.is_empty() => Ok(Self {
                name: (*name).to_string(),
                package: Some((*package).to_string()),
                negated,
            }),
            _ => Err(RequirementError::Malformed {
                category: category.to_string(),
                reason: format!("'{spec}' should be 'name' or 'package/name'"),
            }),
        }
    }
}

/// The three comparison shapes of a state requirement, plus plain presence.
#[derive(Debug, Clone, PartialEq)]
pub enum StateExpectation {
    Present,
    /// The value must equal this one.
    Equals(JsonValue),
    /// The value is a mapping that must contain these entries.
    Contains(Map<String, JsonValue>),
    /// Some entry of the mapping must hold, at one of these positions, the
    /// given value; `null` positions are ignored.
    AnyPositional(Vec<JsonValue>),
    /// Some entry of the mapping must be a mapping with these fields; a `null`
    /// field value only checks the field's presence.
    AnyField(Map<String, JsonValue>),
    /// Some entry of the mapping must equal this value.
    AnyValue(JsonValue),
}

impl StateExpectation {
    /// Builds an expectation from its declarative form: `null` or `"*"` for
    /// presence, `{"*": ...}` for the wildcard shapes, another mapping for a
    /// subset match and anything else for equality.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Present,
            JsonValue::String(s) if s == "*" => Self::Present,
            JsonValue::Object(map) => match (map.len(), map.get("*")) {
                (1, Some(JsonValue::Array(items))) => {
                    Self::AnyPositional(items.iter().map(wildcard_to_null).collect())
                }
                (1, Some(JsonValue::Object(fields))) => Self::AnyField(
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), wildcard_to_null(v)))
                        .collect(),
                ),
                (1, Some(other)) => Self::AnyValue(other.clone()),
                _ => Self::Contains(map.clone()),
            },
            other => Self::Equals(other.clone()),
        }
    }
}

fn wildcard_to_null(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) if s == "*" => JsonValue::Null,
        other => other.clone(),
    }
}

/// Displays JSON without quoting plain strings.
fn display_json(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A state key and what its value must look like.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRequirement {
    pub key: String,
    pub expectation: StateExpectation,
}

/// A custom check. Its failure disables the entity without reporting an issue.
pub type InternalCheck = Rc<dyn Fn(&CheckContext<'_>) -> bool>;

/// Declared requirements of an entity.
#[derive(Clone, Default)]
pub struct Requirements {
    pub config: Vec<ConfigRequirement>,
    pub file: Vec<FileRequirement>,
    pub python: Vec<LookupRequirement>,
    pub system: Vec<LookupRequirement>,
    pub state: Vec<StateRequirement>,
    /// Custom check run after the declared ones.
    pub internal: Option<InternalCheck>,
    /// Custom issue messages.
    pub messages: MessageOverrides,
}

impl fmt::Debug for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requirements")
            .field("config", &self.config)
            .field("file", &self.file)
            .field("python", &self.python)
            .field("system", &self.system)
            .field("state", &self.state)
            .field("internal", &self.internal.is_some())
            .finish()
    }
}

impl Requirements {
    /// The option (`!OPTION` to negate) must equal `expected`.
    pub fn config(mut self, option: &str, expected: &str) -> Self {
        let (negated, option) = unpack_negation(option);
        self.config.push(ConfigRequirement {
            option: option.to_uppercase(),
            expected: expected.to_string(),
            negated,
        });
        self
    }

    /// A path relative to the entity's source file must exist (`!path`: must not).
    pub fn file(mut self, path: &str) -> Self {
        let (negated, path) = unpack_negation(path);
        self.file.push(FileRequirement {
            path: path.to_string(),
            negated,
        });
        self
    }

    /// A Python module must be importable (`!module`: must not);
    /// `package/module` names the package reported when it is not.
    ///
    /// # Errors
    ///
    /// Fails unless `spec` is `name` or `package/name`.
    pub fn python(mut self, spec: &str) -> Result<Self, RequirementError> {
        self.python.push(LookupRequirement::parse("python", spec)?);
        Ok(self)
    }

    /// A tool must be on the search path; `package/tool` names the package
    /// reported when it is not.
    ///
    /// # Errors
    ///
    /// Fails unless `spec` is `name` or `package/name`.
    pub fn system(mut self, spec: &str) -> Result<Self, RequirementError> {
        self.system.push(LookupRequirement::parse("system", spec)?);
        Ok(self)
    }

    /// The state key must satisfy `expectation`.
    pub fn state(mut self, key: &str, expectation: StateExpectation) -> Self {
        self.state.push(StateRequirement {
            key: key.to_string(),
            expectation,
        });
        self
    }

    /// Sets the custom check.
    pub fn internal(mut self, check: impl Fn(&CheckContext<'_>) -> bool + 'static) -> Self {
        self.internal = Some(Rc::new(check));
        self
    }

    /// Overrides the message of one issue.
    ///
    /// # Arguments
    ///
    /// * `category` - The requirement family.
    /// * `subject` - The option, file, tool or package concerned.
    /// * `template` - The message; `{}` is replaced by the subject.
    pub fn message(mut self, category: IssueCategory, subject: &str, template: &str) -> Self {
        self.messages
            .entry(category)
            .or_default()
            .insert(subject.to_string(), template.to_string());
        self
    }

    /// Whether nothing is required.
    pub fn is_empty(&self) -> bool {
        self.config.is_empty()
            && self.file.is_empty()
            && self.python.is_empty()
            && self.system.is_empty()
            && self.state.is_empty()
            && self.internal.is_none()
    }

    /// Evaluates every category and returns whether all passed, along with
    /// the accumulated issues.
    ///
    /// # Arguments
    /// * `source` - The entity's source file; `file` paths are relative to its folder.
    /// * `ctx` - Config chain, shared state and attributes to evaluate against.
    pub fn evaluate(&self, source: &Path, ctx: &CheckContext<'_>) -> (bool, IssueMap) {
        let mut enabled = true;
        let mut issues = IssueMap::new();
        let mut record = |issue: Issue| {
            issues.entry(issue.category()).or_default().insert(issue);
        };

        for req in &self.config {
            let current = ctx.config.and_then(|c| c.get(&req.option).ok());
            let matches = current.is_some_and(|v| value_matches(&v, &req.expected));
            if req.negated == matches {
                enabled = false;
                record(Issue::Config {
                    option: req.option.clone(),
                    expected: req.expected.clone(),
                    negated: req.negated,
                });
            }
        }

        let base = source.parent().unwrap_or_else(|| Path::new("."));
        for req in &self.file {
            if req.negated == base.join(&req.path).exists() {
                enabled = false;
                record(Issue::File {
                    path: req.path.clone(),
                    negated: req.negated,
                });
            }
        }

        if let Some(check) = &self.internal {
            if !check(ctx) {
                enabled = false;
            }
        }

        for req in &self.python {
            if req.negated == paths::python_module_available(&req.name) {
                enabled = false;
                record(Issue::Python {
                    package: req.package.clone().unwrap_or_else(|| req.name.clone()),
                    negated: req.negated,
                });
            }
        }

        for req in &self.system {
            if req.negated == paths::is_executable_in_path(&req.name) {
                enabled = false;
                record(match &req.package {
                    Some(package) => Issue::Package {
                        package: package.clone(),
                        negated: req.negated,
                    },
                    None => Issue::Tool {
                        tool: req.name.clone(),
                        negated: req.negated,
                    },
                });
            }
        }

        for req in &self.state {
            for issue in check_state(req, ctx.state) {
                enabled = false;
                record(issue);
            }
        }

        (enabled, issues)
    }
}

/// Compares a normalized option value with its declared textual form.
fn value_matches(value: &Value, expected: &str) -> bool {
    *value == Value::coerce(expected) || value.to_string() == expected
}

fn check_state(req: &StateRequirement, state: &StateStore) -> Vec<Issue> {
    let key = req.key.clone();
    let Some(current) = state.get(&req.key) else {
        return vec![Issue::StateMissing { key }];
    };
    let mismatch = |expected: &JsonValue| Issue::StateMismatch {
        key: req.key.clone(),
        expected: display_json(expected),
    };
    let absent = |expected: String| Issue::StateAbsent {
        key: req.key.clone(),
        expected,
    };

    match (&req.expectation, &current) {
        (StateExpectation::Present, _) => Vec::new(),
        (StateExpectation::Equals(expected), _) => {
            if *expected == current {
                Vec::new()
            } else {
                vec![mismatch(expected)]
            }
        }
        (StateExpectation::Contains(expected), JsonValue::Object(map)) => {
            let ok = expected.iter().all(|(k, v)| map.get(k) == Some(v));
            if ok {
                Vec::new()
            } else {
                vec![mismatch(&JsonValue::Object(expected.clone()))]
            }
        }
        (StateExpectation::AnyPositional(expected), JsonValue::Object(map)) => {
            let found = expected.iter().enumerate().any(|(i, reference)| {
                !reference.is_null()
                    && map
                        .values()
                        .any(|entry| entry.as_array().and_then(|a| a.get(i)) == Some(reference))
            });
            if found {
                Vec::new()
            } else {
                vec![absent(display_json(&JsonValue::Array(expected.clone())))]
            }
        }
        (StateExpectation::AnyField(fields), JsonValue::Object(map)) => fields
            .iter()
            .filter(|(field, wanted)| {
                !map.values().any(|entry| match entry.as_object() {
                    Some(obj) if wanted.is_null() => obj.contains_key(*field),
                    Some(obj) => obj.get(*field) == Some(*wanted),
                    None => false,
                })
            })
            .map(|(field, wanted)| {
                if wanted.is_null() {
                    absent(field.clone())
                } else {
                    absent(format!("{field}:{}", display_json(wanted)))
                }
            })
            .collect(),
        (StateExpectation::AnyValue(expected), JsonValue::Object(map)) => {
            if map.values().any(|v| v == expected) {
                Vec::new()
            } else {
                vec![absent(display_json(expected))]
            }
        }
        (StateExpectation::Contains(expected), _) => {
            vec![mismatch(&JsonValue::Object(expected.clone()))]
        }
        (
            StateExpectation::AnyPositional(_)
            | StateExpectation::AnyField(_)
            | StateExpectation::AnyValue(_),
            _,
        ) => vec![absent(display_json(&current))],
    }
}

/// Parses the `requirements` table of a manifest.
///
/// Recognized keys are `config` (table), `file`, `python`, `system` (lists of
/// strings) and `state` (a list of keys or a table of expectations).
pub fn parse_requirements(table: &Map<String, JsonValue>) -> Result<Requirements, RequirementError> {
    let mut requirements = Requirements::default();
    for (category, value) in table {
        match category.as_str() {
            "config" => {
                let JsonValue::Object(options) = value else {
                    return Err(malformed("config", "should be a table"));
                };
                for (option, expected) in options {
                    requirements = requirements.config(option, &display_json(expected));
                }
            }
            "file" => {
                for path in string_list("file", value)? {
                    requirements = requirements.file(&path);
                }
            }
            "python" => {
                for spec in string_list("python", value)? {
                    requirements = requirements.python(&spec)?;
                }
            }
            "system" => {
                for spec in string_list("system", value)? {
                    requirements = requirements.system(&spec)?;
                }
            }
            "state" => match value {
                JsonValue::Array(_) => {
                    for key in string_list("state", value)? {
                        requirements = requirements.state(&key, StateExpectation::Present);
                    }
                }
                JsonValue::Object(keys) => {
                    for (key, expected) in keys {
                        requirements =
                            requirements.state(key, StateExpectation::from_json(expected));
                    }
                }
                _ => return Err(malformed("state", "should be a list or a table")),
            },
            other => return Err(RequirementError::UnknownType(other.to_string())),
        }
    }
    Ok(requirements)
}

fn malformed(category: &str, reason: &str) -> RequirementError {
    RequirementError::Malformed {
        category: category.to_string(),
        reason: reason.to_string(),
    }
}

fn string_list(category: &str, value: &JsonValue) -> Result<Vec<String>, RequirementError> {
    match value {
        JsonValue::String(s) => Ok(vec![s.clone()]),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(category, "should only contain strings"))
            })
            .collect(),
        _ => Err(malformed(category, "should be a list of strings")),
    }
}
