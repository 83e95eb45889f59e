// src/core/config.rs

//! Named, validated options grouped into per-console scopes.
//!
//! A [`Config`] is one scope: an ordered map from option name to its raw
//! (as typed) value. Reading goes through the value pipeline in
//! [`Config::get`]; writing goes through [`Config::set`], which validates,
//! skips unchanged values, runs callbacks and asks the owning console for a
//! reset when the option requires it. A [`ProxyConfig`] chains scopes from
//! the innermost console outwards.

use crate::core::template;
use crate::system::paths::{self, PathError};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

// --- Errors ---

/// Errors raised while declaring, reading or writing options.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No scope binds the option.
    #[error("Unknown option '{0}'")]
    UnknownKey(String),
    /// The option rejected the value.
    #[error("Invalid value '{value}' for key '{key}'")]
    InvalidValue {
        /// Option name.
        key: String,
        /// The rejected raw value.
        value: String,
    },
    /// A required option was read while unset.
    #[error("{0} must be defined")]
    Required(String),
    #[error("'{0}' is not set globally")]
    UnknownGlobal(String),
    #[error("No configuration scope can hold '{0}'")]
    NoScope(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

// --- Values ---

/// A normalized option value, produced by the value pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// The explicit unset marker.
    #[default]
    Unset,
    /// `true` or `false`, in any case.
    Bool(bool),
    /// A digits-only value.
    Int(i64),
    /// Anything else, after substitution and path expansion.
    Text(String),
}

impl Value {
    /// Whether this is the explicit unset marker.
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// The boolean, if the value coerced to one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if the value coerced to one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The text, if the value stayed a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerces digit-only strings to integers and `true`/`false` to booleans.
    pub fn coerce(text: &str) -> Self {
        if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(i) = text.parse::<i64>() {
                return Self::Int(i);
            }
        }
        match text.to_lowercase().as_str() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => Self::Text(text.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// --- Option definition ---

/// Runs after a value changed; may return a replacement raw value.
pub type SetCallback = Rc<dyn Fn(&OptionEvent<'_>) -> anyhow::Result<Option<String>>>;
/// Runs after an option was unset.
pub type UnsetCallback = Rc<dyn Fn(&OptionEvent<'_>) -> anyhow::Result<()>>;
/// Last step of the value pipeline.
pub type Transform = Rc<dyn Fn(Value) -> Value>;
/// Accepts or rejects a raw value, overriding the choice list.
pub type ValueCheck = Rc<dyn Fn(&str) -> bool>;

/// What a callback sees when an option changes.
pub struct OptionEvent<'a> {
    /// The option being changed.
    pub name: &'a str,
    /// The new value; [`Value::Unset`] for unset callbacks.
    pub value: &'a Value,
    /// The value before the change, when it could be read.
    pub old_value: Option<&'a Value>,
    /// The scope holding the option.
    pub config: &'a Config,
}

impl fmt::Debug for OptionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionEvent")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("old_value", &self.old_value)
            .finish_non_exhaustive()
    }
}

/// Either a fixed list or a function computed on each access.
#[derive(Clone)]
pub enum ChoiceSource {
    /// Values given once.
    Fixed(Vec<String>),
    /// Values computed on each access.
    Lazy(Rc<dyn Fn() -> Vec<String>>),
}

impl fmt::Debug for ChoiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(values) => f.debug_tuple("Fixed").field(values).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl ChoiceSource {
    /// The current list, computing it for lazy sources.
    pub fn list(&self) -> Vec<String> {
        match self {
            Self::Fixed(values) => values.clone(),
            Self::Lazy(f) => f(),
        }
    }
}

#[derive(Clone, Default)]
enum Domain {
    #[default]
    Free,
    /// Values are restricted to the list unless an explicit check is set.
    Choices(ChoiceSource),
    /// Values are only proposed for completion.
    Suggestions(ChoiceSource),
}

/// The definition of a named option. Values live in the [`Config`] it is bound to.
#[derive(Clone)]
pub struct ConfigOption {
    name: String,
    description: Option<String>,
    required: bool,
    global: bool,
    reset: bool,
    domain: Domain,
    transform: Option<Transform>,
    check: Option<ValueCheck>,
    on_set: Option<SetCallback>,
    on_unset: Option<UnsetCallback>,
}

impl fmt::Debug for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOption")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("global", &self.global)
            .field("reset", &self.reset)
            .finish_non_exhaustive()
    }
}

impl ConfigOption {
    /// A free-form, optional, globally overridable option named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
            global: true,
            reset: false,
            domain: Domain::Free,
            transform: None,
            check: None,
            on_set: None,
            on_unset: None,
        }
    }

    /// Sets the text shown by `show options`.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// A required option cannot be read while unset.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Whether `setg` may override this option process-wide.
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Changing this option resets the console owning it.
    pub fn reset_console(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Restricts values to `values`, compared case-insensitively.
    ///
    /// # Arguments
    ///
    /// * `values` - The accepted values, also proposed for completion.
    pub fn choices<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = Domain::Choices(ChoiceSource::Fixed(
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Like [`ConfigOption::choices`], with the list computed on each access.
    pub fn lazy_choices(mut self, f: impl Fn() -> Vec<String> + 'static) -> Self {
        self.domain = Domain::Choices(ChoiceSource::Lazy(Rc::new(f)));
        self
    }

    /// Proposes `values` for completion without restricting the option.
    pub fn suggestions<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = Domain::Suggestions(ChoiceSource::Fixed(
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Like [`ConfigOption::suggestions`], computed on each access.
    pub fn lazy_suggestions(mut self, f: impl Fn() -> Vec<String> + 'static) -> Self {
        self.domain = Domain::Suggestions(ChoiceSource::Lazy(Rc::new(f)));
        self
    }

    /// Shorthand for a `true`/`false` choice.
    pub fn boolean(self) -> Self {
        self.choices(["true", "false"])
    }

    /// Applies `f` to every value read.
    pub fn transform(mut self, f: impl Fn(Value) -> Value + 'static) -> Self {
        self.transform = Some(Rc::new(f));
        self
    }

    /// Replaces the choice check with `f`.
    pub fn validate(mut self, f: impl Fn(&str) -> bool + 'static) -> Self {
        self.check = Some(Rc::new(f));
        self
    }

    /// Runs `f` each time the value changes.
    ///
    /// An `Ok(Some(raw))` result replaces the stored value when it is accepted.
    /// An error is logged and kept as the scope's last error; the set still
    /// succeeds.
    pub fn on_set(
        mut self,
        f: impl Fn(&OptionEvent<'_>) -> anyhow::Result<Option<String>> + 'static,
    ) -> Self {
        self.on_set = Some(Rc::new(f));
        self
    }

    /// Runs `f` each time the option is unset.
    pub fn on_unset(mut self, f: impl Fn(&OptionEvent<'_>) -> anyhow::Result<()> + 'static) -> Self {
        self.on_unset = Some(Rc::new(f));
        self
    }

    /// The option name, upper case by convention.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description, empty when none was given.
    pub fn describe(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Whether reading the unset option is an error.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether `setg` applies to it.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Whether a change asks the owning console for a reset.
    pub fn resets_console(&self) -> bool {
        self.reset
    }

    /// Values proposed for completion, whether restrictive or not.
    pub fn choice_list(&self) -> Vec<String> {
        match &self.domain {
            Domain::Free => Vec::new(),
            Domain::Choices(source) | Domain::Suggestions(source) => source.list(),
        }
    }

    /// Validates a raw value; fixed choices are compared case-insensitively.
    pub fn accepts(&self, raw: &str) -> bool {
        if let Some(check) = &self.check {
            return check(raw);
        }
        match &self.domain {
            Domain::Choices(source) => {
                let lowered = raw.to_lowercase();
                source.list().iter().any(|c| c.to_lowercase() == lowered)
            }
            _ => true,
        }
    }

    /// Options named `*FOLDER` or `*WORKSPACE` hold filesystem paths.
    pub fn is_path(&self) -> bool {
        self.name.ends_with("FOLDER") || self.name.ends_with("WORKSPACE")
    }
}

// --- Process-wide overrides ---

/// Values set with `setg`, consulted when a scope still holds its default.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    values: Rc<RefCell<BTreeMap<String, String>>>,
}

impl GlobalOptions {
    /// The override for `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    /// Sets the override for `key`.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.borrow_mut().insert(key.into(), value.into());
    }

    /// Drops the override for `key`, returning it.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.borrow_mut().remove(key)
    }

    /// Overridden option names, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }
}

// --- Back-reference to the owning console ---

/// The piece of a console a scope may see: its attributes for `{attr}`
/// substitution and a flag to request a reset.
#[derive(Debug, Default)]
pub struct ConsoleLink {
    attributes: RefCell<BTreeMap<String, String>>,
    reset_requested: Cell<bool>,
}

impl ConsoleLink {
    /// Sets an attribute available to `{name}` substitution.
    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.borrow_mut().insert(name.into(), value.into());
    }

    /// The attribute `name`, if the console has it.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.borrow().get(name).cloned()
    }

    /// Marks the console for a reset after the current command.
    pub fn request_reset(&self) {
        self.reset_requested.set(true);
    }

    /// Returns and clears the pending reset request.
    pub fn take_reset_request(&self) -> bool {
        self.reset_requested.replace(false)
    }
}

// --- Config scope ---

#[derive(Debug, Clone)]
struct Entry {
    option: ConfigOption,
    default: Option<String>,
    raw: Option<String>,
}

#[derive(Debug)]
struct Scope {
    title: String,
    entries: BTreeMap<String, Entry>,
    globals: GlobalOptions,
    link: Option<Rc<ConsoleLink>>,
    last_error: Option<String>,
}

/// Result of a successful [`Config::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetStatus {
    /// The normalized value did not change; no callback ran.
    Unchanged,
    /// The value now read back.
    Changed(Value),
}

/// One displayable row of a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRow {
    /// Option name.
    pub name: String,
    /// Current value, empty when unset or unreadable.
    pub value: String,
    /// Whether the option is required.
    pub required: bool,
    /// Option description.
    pub description: String,
}

/// A cloneable handle over one configuration scope.
#[derive(Debug, Clone)]
pub struct Config {
    scope: Rc<RefCell<Scope>>,
}

impl Config {
    /// An empty scope titled `title`, sharing `globals` with every other scope.
    pub fn new(title: impl Into<String>, globals: &GlobalOptions) -> Self {
        Self {
            scope: Rc::new(RefCell::new(Scope {
                title: title.into(),
                entries: BTreeMap::new(),
                globals: globals.clone(),
                link: None,
                last_error: None,
            })),
        }
    }

    /// The title of the options table of this scope.
    pub fn title(&self) -> String {
        self.scope.borrow().title.clone()
    }

    /// Binds the scope to a console for substitution and reset requests.
    pub fn attach_link(&self, link: Rc<ConsoleLink>) {
        self.scope.borrow_mut().link = Some(link);
    }

    /// The console link, once attached.
    pub fn link(&self) -> Option<Rc<ConsoleLink>> {
        self.scope.borrow().link.clone()
    }

    /// Whether both handles point to the same scope.
    pub fn same_scope(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }

    /// Binds `option` with `default` as both its default and current value.
    /// No validation and no callbacks; an existing binding of the same name
    /// is replaced in place.
    pub fn declare(&self, option: ConfigOption, default: Option<&str>) {
        let name = option.name().to_string();
        let default = default.map(str::to_string);
        self.scope.borrow_mut().entries.insert(
            name,
            Entry {
                option,
                raw: default.clone(),
                default,
            },
        );
    }

    /// Whether this scope binds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.scope.borrow().entries.contains_key(key)
    }

    /// The definition bound to `key`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownKey`] when the scope does not bind it.
    pub fn option(&self, key: &str) -> Result<ConfigOption, ConfigError> {
        self.scope
            .borrow()
            .entries
            .get(key)
            .map(|e| e.option.clone())
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    /// The value as typed by the user, `None` for the unset marker.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownKey`] when the scope does not bind `key`.
    pub fn raw(&self, key: &str) -> Result<Option<String>, ConfigError> {
        self.scope
            .borrow()
            .entries
            .get(key)
            .map(|e| e.raw.clone())
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    /// Reads a value through the full pipeline:
    /// global override, required check, `{attr}` substitution, path
    /// expansion, type coercion and finally the option's transform.
    ///
    /// # Errors
    /// Returns an error if the key is unknown, if a required option is unset
    /// or if path expansion fails.
    pub fn get(&self, key: &str) -> Result<Value, ConfigError> {
        let (entry, globals, link) = {
            let scope = self.scope.borrow();
            let entry = scope
                .entries
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
            (entry, scope.globals.clone(), scope.link.clone())
        };

        let mut raw = entry.raw;
        if raw == entry.default {
            if let Some(global) = globals.get(key) {
                raw = Some(global);
            }
        }

        let value = match raw {
            None if entry.option.is_required() => {
                return Err(ConfigError::Required(key.to_string()));
            }
            None => Value::Unset,
            Some(text) => {
                let text = match &link {
                    Some(link) => template::substitute_attributes(&text, |attr| link.attribute(attr)),
                    None => text,
                };
                if entry.option.is_path() {
                    Value::Text(paths::expand_path(&text)?.display().to_string())
                } else {
                    Value::coerce(&text)
                }
            }
        };

        Ok(match &entry.option.transform {
            Some(transform) => transform(value),
            None => value,
        })
    }

    /// Validates and stores a value; see [`Config::force_set`] to run the
    /// callback even when the value does not change. Setting a key the scope
    /// does not bind declares a free-form option for it.
    ///
    /// # Arguments
    ///
    /// * `key` - The option name.
    /// * `value` - The raw value, as typed.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when the option rejects `value`,
    /// or the read error of the new value, in which case the old one is kept.
    pub fn set(&self, key: &str, value: &str) -> Result<SetStatus, ConfigError> {
        self.store(key, value, false)
    }

    /// Like [`Config::set`], but the callback runs even for an unchanged value.
    ///
    /// # Errors
    /// Same as [`Config::set`].
    pub fn force_set(&self, key: &str, value: &str) -> Result<SetStatus, ConfigError> {
        self.store(key, value, true)
    }

    fn write_raw(&self, key: &str, value: Option<String>) {
        if let Some(entry) = self.scope.borrow_mut().entries.get_mut(key) {
            entry.raw = value;
        }
    }

    fn store(&self, key: &str, value: &str, force: bool) -> Result<SetStatus, ConfigError> {
        let option = match self.option(key) {
            Ok(option) => option,
            Err(_) => {
                let option = ConfigOption::new(key);
                self.declare(option.clone(), None);
                option
            }
        };
        if !option.accepts(value) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }

        let old_raw = self.raw(key)?;
        let old_value = self.get(key).ok();
        self.write_raw(key, Some(value.to_string()));
        let new_value = match self.get(key) {
            Ok(v) => v,
            Err(e) => {
                self.write_raw(key, old_raw);
                return Err(e);
            }
        };
        if !force && old_value.as_ref() == Some(&new_value) {
            log::debug!("{} unchanged", key);
            return Ok(SetStatus::Unchanged);
        }

        self.scope.borrow_mut().last_error = None;
        if let Some(callback) = &option.on_set {
            let event = OptionEvent {
                name: key,
                value: &new_value,
                old_value: old_value.as_ref(),
                config: self,
            };
            match callback(&event) {
                Ok(Some(replacement)) if option.accepts(&replacement) => {
                    self.write_raw(key, Some(replacement));
                }
                Ok(Some(replacement)) => {
                    self.scope.borrow_mut().last_error = Some(
                        ConfigError::InvalidValue {
                            key: key.to_string(),
                            value: replacement,
                        }
                        .to_string(),
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Callback of option '{}' failed: {}", key, e);
                    self.scope.borrow_mut().last_error = Some(e.to_string());
                }
            }
        }

        if option.resets_console() {
            if let Some(link) = self.link() {
                link.request_reset();
            }
        }
        let final_value = self.get(key).unwrap_or(new_value);
        log::info!("{} => {}", key, final_value);
        Ok(SetStatus::Changed(final_value))
    }

    /// Restores the unset marker and fires the unset callback.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownKey`] when the scope does not bind `key`.
    pub fn unset(&self, key: &str) -> Result<(), ConfigError> {
        let option = self.option(key)?;
        let old_value = self.get(key).ok();
        self.write_raw(key, None);

        if let Some(callback) = &option.on_unset {
            let event = OptionEvent {
                name: key,
                value: &Value::Unset,
                old_value: old_value.as_ref(),
                config: self,
            };
            if let Err(e) = callback(&event) {
                log::warn!("Unset callback of option '{}' failed: {}", key, e);
                self.scope.borrow_mut().last_error = Some(e.to_string());
            }
        }
        if option.resets_console() {
            if let Some(link) = self.link() {
                link.request_reset();
            }
        }
        log::debug!("{} unset", key);
        Ok(())
    }

    /// Option names of this scope. With `include_global`, only options that
    /// accept a global override are listed, followed by globally set names
    /// not bound here.
    pub fn keys(&self, include_global: bool) -> Vec<String> {
        let scope = self.scope.borrow();
        if !include_global {
            return scope.entries.keys().cloned().collect();
        }
        let mut keys: Vec<String> = scope
            .entries
            .values()
            .filter(|e| e.option.is_global())
            .map(|e| e.option.name().to_string())
            .collect();
        for key in scope.globals.keys() {
            if !scope.entries.contains_key(&key) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Rows of `show options`, one per bound option, in name order.
    pub fn items(&self) -> Vec<OptionRow> {
        let entries: Vec<Entry> = self.scope.borrow().entries.values().cloned().collect();
        entries
            .into_iter()
            .map(|e| OptionRow {
                value: self
                    .get(e.option.name())
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                name: e.option.name().to_string(),
                required: e.option.is_required(),
                description: e.option.describe().to_string(),
            })
            .collect()
    }

    /// The error captured from the most recent set callback, if any.
    pub fn last_error(&self) -> Option<String> {
        self.scope.borrow().last_error.clone()
    }

    /// Stores a process-wide override, validated against a bound option.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when the bound option rejects it.
    pub fn set_global(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Ok(option) = self.option(key) {
            if !option.accepts(value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        self.scope.borrow().globals.insert(key, value);
        log::info!("{} => {} (global)", key, value);
        Ok(())
    }

    /// Drops the process-wide override of `key`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownGlobal`] when `key` was not set globally.
    pub fn unset_global(&self, key: &str) -> Result<(), ConfigError> {
        self.scope
            .borrow()
            .globals
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownGlobal(key.to_string()))
    }
}

// --- Scope chain ---

/// Scopes ordered by read priority, innermost first.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    scopes: Vec<Config>,
}

impl ProxyConfig {
    /// Chains `scopes`, innermost first; duplicates are skipped.
    pub fn new(scopes: Vec<Config>) -> Self {
        let mut proxy = Self::default();
        for scope in scopes {
            proxy.append(scope);
        }
        proxy
    }

    /// Appends a scope unless it is already part of the chain.
    pub fn append(&mut self, scope: Config) {
        if !self.scopes.iter().any(|s| s.same_scope(&scope)) {
            self.scopes.push(scope);
        }
    }

    /// The chained scopes, innermost first.
    pub fn scopes(&self) -> &[Config] {
        &self.scopes
    }

    /// The scope that binds `key`, if any.
    pub fn owner(&self, key: &str) -> Option<&Config> {
        self.scopes.iter().find(|s| s.contains(key))
    }

    /// Whether some scope binds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.owner(key).is_some()
    }

    /// Reads `key` from the innermost scope binding it.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownKey`] when no scope binds it, or the error
    /// of [`Config::get`].
    pub fn get(&self, key: &str) -> Result<Value, ConfigError> {
        self.owner(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?
            .get(key)
    }

    /// The definition of `key` in the innermost scope binding it.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownKey`] when no scope binds it.
    pub fn option(&self, key: &str) -> Result<ConfigOption, ConfigError> {
        self.owner(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?
            .option(key)
    }

    /// Sets through the owning scope, or the first scope for a new key.
    ///
    /// # Errors
    /// Returns [`ConfigError::NoScope`] for an empty chain, or the error of
    /// [`Config::set`].
    pub fn set(&self, key: &str, value: &str) -> Result<SetStatus, ConfigError> {
        self.owner(key)
            .or_else(|| self.scopes.first())
            .ok_or_else(|| ConfigError::NoScope(key.to_string()))?
            .set(key, value)
    }

    /// Unsets the key in every scope binding it.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownKey`] when no scope binds it.
    pub fn unset(&self, key: &str) -> Result<(), ConfigError> {
        let owners: Vec<&Config> = self.scopes.iter().filter(|s| s.contains(key)).collect();
        if owners.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        for scope in owners {
            scope.unset(key)?;
        }
        Ok(())
    }

    /// Stores a process-wide override through the scope owning `key`.
    ///
    /// # Errors
    /// Fails when no scope exists or the owning option rejects `value`.
    pub fn set_global(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.owner(key)
            .or_else(|| self.scopes.first())
            .ok_or_else(|| ConfigError::NoScope(key.to_string()))?
            .set_global(key, value)
    }

    /// Drops the process-wide override of `key`.
    ///
    /// # Errors
    /// Fails when no scope exists or `key` was not set globally.
    pub fn unset_global(&self, key: &str) -> Result<(), ConfigError> {
        self.scopes
            .first()
            .ok_or_else(|| ConfigError::NoScope(key.to_string()))?
            .unset_global(key)
    }

    /// Option names of every scope, sorted and deduplicated; see [`Config::keys`].
    pub fn keys(&self, include_global: bool) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for scope in &self.scopes {
            for key in scope.keys(include_global) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        keys
    }

    /// The last callback error of the scope owning `key`.
    pub fn last_error(&self, key: &str) -> Option<String> {
        self.owner(key).and_then(Config::last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn scope(title: &str) -> (Config, GlobalOptions) {
        let globals = GlobalOptions::default();
        (Config::new(title, &globals), globals)
    }

    #[test]
    fn test_set_get_roundtrip_after_normalization() {
        let (config, _) = scope("Console");
        config.declare(ConfigOption::new("THREADS"), Some("4"));
        config.declare(ConfigOption::new("VERBOSE"), None);

        assert_eq!(config.get("THREADS").unwrap(), Value::Int(4));
        config.set("VERBOSE", "TRUE").unwrap();
        assert_eq!(config.get("VERBOSE").unwrap(), Value::Bool(true));
        config.set("THREADS", "name").unwrap();
        assert_eq!(config.get("THREADS").unwrap(), Value::Text("name".into()));
    }

    #[test]
    fn test_unset_restores_marker_and_fires_callback() {
        // --- Setup ---
        let (config, _) = scope("Console");
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        config.declare(
            ConfigOption::new("TARGET").on_unset(move |event| {
                assert_eq!(event.old_value, Some(&Value::Text("host".into())));
                flag.set(true);
                Ok(())
            }),
            Some("host"),
        );

        // --- Execute ---
        config.unset("TARGET").unwrap();

        // --- Assert ---
        assert!(fired.get());
        assert!(config.contains("TARGET"), "unset never drops the key");
        assert_eq!(config.get("TARGET").unwrap(), Value::Unset);
    }

    #[test]
    fn test_required_option_must_be_defined() {
        let (config, _) = scope("Console");
        config.declare(ConfigOption::new("RHOST").required(true), None);
        let err = config.get("RHOST").unwrap_err();
        assert_eq!(err.to_string(), "RHOST must be defined");
    }

    #[test]
    fn test_global_override_only_applies_to_defaults() {
        let (config, globals) = scope("Console");
        config.declare(ConfigOption::new("LHOST"), Some("127.0.0.1"));
        globals.insert("LHOST", "10.0.0.2");
        assert_eq!(config.get("LHOST").unwrap(), Value::Text("10.0.0.2".into()));

        config.set("LHOST", "192.168.1.1").unwrap();
        assert_eq!(config.get("LHOST").unwrap(), Value::Text("192.168.1.1".into()));
    }

    #[test]
    fn test_attribute_substitution_and_path_expansion() {
        let (config, _) = scope("Console");
        let link = Rc::new(ConsoleLink::default());
        link.set_attribute("appname", "demo");
        config.attach_link(link);
        config.declare(ConfigOption::new("APP_FOLDER"), Some("~/.{appname}"));
        config.declare(ConfigOption::new("BANNER"), Some("{appname} v1"));

        let folder = config.get("APP_FOLDER").unwrap();
        let folder = folder.as_text().unwrap();
        assert!(std::path::Path::new(folder).is_absolute());
        assert!(folder.ends_with(".demo"));
        assert_eq!(config.get("BANNER").unwrap(), Value::Text("demo v1".into()));
    }

    #[test]
    fn test_transform_runs_last() {
        let (config, _) = scope("Console");
        config.declare(
            ConfigOption::new("PORT").transform(|v| match v {
                Value::Int(i) => Value::Int(i + 1),
                other => other,
            }),
            Some("79"),
        );
        assert_eq!(config.get("PORT").unwrap(), Value::Int(80));
    }

    #[test]
    fn test_choices_validate_case_insensitively() {
        let (config, _) = scope("Console");
        config.declare(ConfigOption::new("MODE").choices(["Fast", "slow"]), Some("slow"));
        assert!(config.set("MODE", "fast").is_ok());
        let err = config.set("MODE", "medium").unwrap_err();
        assert_eq!(err.to_string(), "Invalid value 'medium' for key 'MODE'");
    }

    #[test]
    fn test_suggestions_do_not_restrict() {
        let (config, _) = scope("Console");
        config.declare(ConfigOption::new("USER").suggestions(["root"]), None);
        assert!(config.set("USER", "admin").is_ok());
        assert_eq!(config.option("USER").unwrap().choice_list(), vec!["root"]);
    }

    #[test]
    fn test_unchanged_value_skips_callback() {
        let (config, _) = scope("Console");
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        config.declare(
            ConfigOption::new("DEBUG").boolean().on_set(move |_| {
                counter.set(counter.get() + 1);
                Ok(None)
            }),
            Some("false"),
        );

        assert_eq!(config.set("DEBUG", "False").unwrap(), SetStatus::Unchanged);
        assert_eq!(calls.get(), 0);
        assert_eq!(
            config.set("DEBUG", "true").unwrap(),
            SetStatus::Changed(Value::Bool(true))
        );
        assert_eq!(calls.get(), 1);
        config.force_set("DEBUG", "true").unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_callback_error_is_captured() {
        let (config, _) = scope("Console");
        config.declare(
            ConfigOption::new("WORKSPACE_NAME").on_set(|_| Err(anyhow!("disk full"))),
            None,
        );
        assert!(config.set("WORKSPACE_NAME", "x").is_ok());
        assert_eq!(config.last_error().as_deref(), Some("disk full"));
        assert_eq!(config.get("WORKSPACE_NAME").unwrap(), Value::Text("x".into()));
    }

    #[test]
    fn test_callback_replacement_value() {
        let (config, _) = scope("Console");
        config.declare(
            ConfigOption::new("NAME").on_set(|event| Ok(Some(event.value.to_string().to_uppercase()))),
            None,
        );
        config.set("NAME", "abc").unwrap();
        assert_eq!(config.get("NAME").unwrap(), Value::Text("ABC".into()));
    }

    #[test]
    fn test_reset_option_requests_console_reset() {
        let (config, _) = scope("Console");
        let link = Rc::new(ConsoleLink::default());
        config.attach_link(link.clone());
        config.declare(ConfigOption::new("DEBUG").boolean().reset_console(), Some("false"));

        config.set("DEBUG", "true").unwrap();
        assert!(link.take_reset_request());
        assert!(!link.take_reset_request(), "the request is consumed");
    }

    #[test]
    fn test_set_unknown_key_binds_new_option() {
        let (config, _) = scope("Console");
        config.set("FRESH", "1").unwrap();
        assert!(config.contains("FRESH"));
        assert_eq!(config.get("FRESH").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_keys_with_globals() {
        let (config, globals) = scope("Console");
        config.declare(ConfigOption::new("APP_FOLDER").global(false), None);
        config.declare(ConfigOption::new("WORKSPACE"), None);
        globals.insert("LHOST", "x");

        assert_eq!(config.keys(false), vec!["APP_FOLDER", "WORKSPACE"]);
        assert_eq!(config.keys(true), vec!["WORKSPACE", "LHOST"]);
    }

    #[test]
    fn test_set_and_unset_global() {
        let (config, globals) = scope("Console");
        config.declare(ConfigOption::new("MODE").choices(["a", "b"]), Some("a"));
        assert!(config.set_global("MODE", "c").is_err());
        config.set_global("MODE", "b").unwrap();
        assert_eq!(globals.get("MODE").as_deref(), Some("b"));
        config.unset_global("MODE").unwrap();
        assert!(matches!(
            config.unset_global("MODE"),
            Err(ConfigError::UnknownGlobal(_))
        ));
    }

    #[test]
    fn test_proxy_reads_parent_and_writes_owner() {
        // --- Setup ---
        let globals = GlobalOptions::default();
        let child = Config::new("Module", &globals);
        let parent = Config::new("Console", &globals);
        let proxy = ProxyConfig::new(vec![child.clone(), parent.clone()]);
        parent.declare(ConfigOption::new("TIMEOUT"), Some("10"));

        // --- Execute & Assert: inherited read ---
        assert_eq!(proxy.get("TIMEOUT").unwrap(), Value::Int(10));

        // --- Execute & Assert: key owned by child is written in child ---
        child.declare(ConfigOption::new("TIMEOUT"), Some("5"));
        proxy.set("TIMEOUT", "7").unwrap();
        assert_eq!(child.get("TIMEOUT").unwrap(), Value::Int(7));
        assert_eq!(parent.get("TIMEOUT").unwrap(), Value::Int(10));

        // --- New keys land in the first scope ---
        proxy.set("NEW", "x").unwrap();
        assert!(child.contains("NEW"));
        assert!(!parent.contains("NEW"));
    }

    #[test]
    fn test_proxy_unset_targets_all_owners_and_dedupes_scopes() {
        let globals = GlobalOptions::default();
        let a = Config::new("A", &globals);
        let b = Config::new("B", &globals);
        a.declare(ConfigOption::new("K"), Some("1"));
        b.declare(ConfigOption::new("K"), Some("2"));
        let mut proxy = ProxyConfig::new(vec![a.clone(), b.clone()]);
        proxy.append(a.clone());
        assert_eq!(proxy.scopes().len(), 2);

        proxy.unset("K").unwrap();
        assert_eq!(a.get("K").unwrap(), Value::Unset);
        assert_eq!(b.get("K").unwrap(), Value::Unset);
        assert!(matches!(proxy.unset("MISSING"), Err(ConfigError::UnknownKey(_))));
    }
}
