// src/models.rs

//! On-disk entity manifests (TOML).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Manifest root ---

/// One manifest file. Every table array is optional.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EntityManifest {
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandManifest>,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleManifest>,
    #[serde(default, rename = "model")]
    pub models: Vec<DescriptorManifest>,
    #[serde(default, rename = "store_extension")]
    pub store_extensions: Vec<DescriptorManifest>,
}

// --- Shared pieces ---

/// A shell command template or a sequence of them, run in order.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Runnable {
    Sequence(Vec<String>),
    Single(String),
}

impl Runnable {
    /// The command lines, in order.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Sequence(lines) => lines.clone(),
            Self::Single(line) => vec![line.clone()],
        }
    }
}

/// A string or a list of strings.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Every value, in order.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

/// Completion values: one list for every key, or a list per key.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ValuesManifest {
    List(Vec<String>),
    PerKey(BTreeMap<String, Vec<String>>),
}

/// Descriptive fields shared by commands and modules.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct MetadataManifest {
    pub description: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    /// Free text passed to the docstring parser.
    pub doc: Option<String>,
}

/// `[[<kind>.applies_to]]`: the attribute at `path` must equal `value`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ApplicabilityManifest {
    pub path: String,
    pub value: String,
}

// --- Commands ---

/// A command declared in a TOML manifest.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CommandManifest {
    pub name: String,
    #[serde(flatten)]
    pub metadata: MetadataManifest,
    pub level: Option<OneOrMany>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub alias_only: bool,
    #[serde(default)]
    pub except_levels: Vec<String>,
    #[serde(default)]
    pub single_arg: bool,
    /// Parameter names; `name=default` marks an optional one.
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub values: Option<ValuesManifest>,
    pub run: Runnable,
    /// Capture the output instead of streaming it.
    #[serde(default)]
    pub capture: bool,
    pub requirements: Option<toml::Table>,
    #[serde(default)]
    pub requirements_messages: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub applies_to: Vec<ApplicabilityManifest>,
}

// --- Modules ---

/// A module declared in a TOML manifest.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModuleManifest {
    pub name: String,
    /// Category path; defaults to the manifest's folder relative to its source.
    pub path: Option<String>,
    #[serde(flatten)]
    pub metadata: MetadataManifest,
    /// `[name, default, required, description]`; only the name is mandatory.
    #[serde(default)]
    pub options: Vec<Vec<toml::Value>>,
    pub run: Runnable,
    /// Start the command as a background job instead of waiting for it.
    #[serde(default)]
    pub background: bool,
    pub requirements: Option<toml::Table>,
    #[serde(default)]
    pub requirements_messages: BTreeMap<String, BTreeMap<String, String>>,
}

// --- Descriptors ---

/// A model or store extension declared in a TOML manifest.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct DescriptorManifest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let text = r#"
            [[command]]
            name = "ping"
            description = "Ping a host"
            level = ["root", "project"]
            params = ["host", "count=1"]
            values = { host = ["localhost"] }
            run = "ping -c {count} {host}"
            requirements = { system = ["ping"] }

            [[module]]
            name = "sweep"
            options = [["TARGET", "", true, "Network to sweep"]]
            run = ["echo start", "echo {TARGET}"]
            background = true

            [[model]]
            name = "host"
            fields = { address = "text" }
        "#;
        let manifest: EntityManifest = toml::from_str(text).unwrap();
        assert_eq!(manifest.commands.len(), 1);
        let command = &manifest.commands[0];
        assert_eq!(command.metadata.description.as_deref(), Some("Ping a host"));
        assert_eq!(command.level.as_ref().unwrap().to_vec(), vec!["root", "project"]);
        assert!(matches!(command.values, Some(ValuesManifest::PerKey(_))));
        assert_eq!(manifest.modules[0].run.lines().len(), 2);
        assert!(manifest.modules[0].background);
        assert_eq!(manifest.models[0].fields["address"], "text");
        assert!(manifest.store_extensions.is_empty());
    }

    #[test]
    fn test_rejects_unknown_tables() {
        assert!(toml::from_str::<EntityManifest>("[[widget]]\nname = 'x'").is_err());
    }
}
