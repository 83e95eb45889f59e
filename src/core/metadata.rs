// src/core/metadata.rs

//! Descriptive metadata of entities and the docstring parser filling it.

use crate::core::config::{Config, ConfigOption};
use std::collections::BTreeMap;
use thiserror::Error;

/// Malformed metadata declarations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Bad option declaration {0:?}: expected (name, default, required, description)")]
    BadOption(Vec<String>),
}

/// An option declared in metadata: `(name, default, required, description)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDecl {
    pub name: String,
    pub default: Option<String>,
    pub required: bool,
    pub description: String,
}

impl OptionDecl {
    /// Builds a declaration from its tuple form; only the name is mandatory.
    pub fn from_parts(parts: &[String]) -> Result<Self, MetadataError> {
        let bad = || MetadataError::BadOption(parts.to_vec());
        let (name, rest) = parts.split_first().ok_or_else(bad)?;
        if name.trim().is_empty() || rest.len() > 3 {
            return Err(bad());
        }
        let default = rest.first().filter(|d| !d.is_empty()).cloned();
        let required = match rest.get(1).map(|r| r.to_lowercase()) {
            None => false,
            Some(r) if r == "true" => true,
            Some(r) if r == "false" || r.is_empty() => false,
            Some(_) => return Err(bad()),
        };
        Ok(Self {
            name: name.trim().to_string(),
            default,
            required,
            description: rest.get(2).cloned().unwrap_or_default(),
        })
    }

    /// The option this declaration describes.
    pub fn to_option(&self) -> ConfigOption {
        ConfigOption::new(self.name.clone())
            .description(self.description.clone())
            .required(self.required)
    }

    /// Declares the option in `config` with its default.
    pub fn declare_in(&self, config: &Config) {
        config.declare(self.to_option(), self.default.as_deref());
    }
}

/// Canonical metadata of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub description: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub version: Option<String>,
    pub comments: Vec<String>,
    pub options: Vec<OptionDecl>,
    pub extra: BTreeMap<String, String>,
}

/// A swappable parser turning free documentation text into metadata.
pub type DocstringParser = fn(&str) -> Metadata;

impl Metadata {
    /// Sets the description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Sets the author.
    pub fn author(mut self, text: impl Into<String>) -> Self {
        self.author = Some(text.into());
        self
    }

    /// Sets the version.
    pub fn version(mut self, text: impl Into<String>) -> Self {
        self.version = Some(text.into());
        self
    }

    /// Adds an option declaration.
    pub fn option(mut self, decl: OptionDecl) -> Self {
        self.options.push(decl);
        self
    }

    /// Copies the fields of `parsed` that are still unset here.
    pub fn fill_missing(&mut self, parsed: Self) {
        if self.description.is_none() {
            self.description = parsed.description;
        }
        if self.author.is_none() {
            self.author = parsed.author;
        }
        if self.email.is_none() {
            self.email = parsed.email;
        }
        if self.version.is_none() {
            self.version = parsed.version;
        }
        if self.comments.is_empty() {
            self.comments = parsed.comments;
        }
        if self.options.is_empty() {
            self.options = parsed.options;
        }
        for (key, value) in parsed.extra {
            self.extra.entry(key).or_insert(value);
        }
    }

    /// Label/value rows for an information table; lists spread over rows.
    pub fn info_rows(&self, name: &str) -> Vec<(String, String)> {
        let mut rows = vec![("Name:".to_string(), name.to_string())];
        let mut push = |label: &str, value: &Option<String>| {
            if let Some(v) = value.as_ref().filter(|v| !v.is_empty()) {
                rows.push((label.to_string(), v.clone()));
            }
        };
        push("Description:", &self.description);
        push("Author:", &self.author);
        push("Email:", &self.email);
        push("Version:", &self.version);
        for (i, comment) in self.comments.iter().enumerate() {
            let label = if i == 0 { "Comments:" } else { "" };
            rows.push((label.to_string(), comment.clone()));
        }
        for (key, value) in &self.extra {
            rows.push((format!("{}:", capitalize(key)), value.clone()));
        }
        rows
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Default documentation parser.
///
/// `Key: value` lines fill the matching field (`Author`, `Email`, `Version`,
/// `Comments`, anything else goes to `extra`); the first paragraph of other
/// text is the description and later paragraphs become comments.
pub fn parse_docstring(text: &str) -> Metadata {
    let mut meta = Metadata::default();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim) {
        if let Some((key, value)) = line.split_once(':').filter(|(k, _)| is_field_name(k)) {
            let value = value.trim().to_string();
            match key.trim().to_lowercase().as_str() {
                "author" => meta.author = Some(value),
                "email" => meta.email = Some(value),
                "version" => meta.version = Some(value),
                "comments" | "comment" => meta.comments.push(value),
                other => {
                    meta.extra.insert(other.to_string(), value);
                }
            }
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    let mut paragraphs = paragraphs.into_iter();
    meta.description = paragraphs.next();
    meta.comments.extend(paragraphs);
    meta
}

fn is_field_name(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty()
        && key.len() <= 20
        && key.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{GlobalOptions, Value};

    fn parts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_option_decl_shapes() {
        let full = OptionDecl::from_parts(&parts(&["RHOST", "127.0.0.1", "true", "Remote host"])).unwrap();
        assert!(full.required);
        assert_eq!(full.default.as_deref(), Some("127.0.0.1"));

        let minimal = OptionDecl::from_parts(&parts(&["PORT"])).unwrap();
        assert!(!minimal.required);
        assert!(minimal.default.is_none());

        assert!(OptionDecl::from_parts(&parts(&[])).is_err());
        assert!(OptionDecl::from_parts(&parts(&["A", "b", "maybe"])).is_err());
        assert!(OptionDecl::from_parts(&parts(&["A", "b", "true", "d", "extra"])).is_err());
    }

    #[test]
    fn test_option_decl_declares_in_config() {
        let config = Config::new("Module", &GlobalOptions::default());
        OptionDecl::from_parts(&parts(&["PORT", "80", "false", "Port"]))
            .unwrap()
            .declare_in(&config);
        assert_eq!(config.get("PORT").unwrap(), Value::Int(80));
        assert_eq!(config.option("PORT").unwrap().describe(), "Port");
    }

    #[test]
    fn test_parse_docstring() {
        let doc = "Scan a host for open ports.\n\nUses a TCP connect scan.\n\nAuthor: Jane Doe\nVersion: 1.2\nReference: https://example.org";
        let meta = parse_docstring(doc);
        assert_eq!(meta.description.as_deref(), Some("Scan a host for open ports."));
        assert_eq!(meta.comments, vec!["Uses a TCP connect scan."]);
        assert_eq!(meta.author.as_deref(), Some("Jane Doe"));
        assert_eq!(meta.version.as_deref(), Some("1.2"));
        assert_eq!(meta.extra.get("reference").map(String::as_str), Some("https://example.org"));
    }

    #[test]
    fn test_fill_missing_keeps_explicit_fields() {
        let mut meta = Metadata::default().description("explicit");
        meta.fill_missing(parse_docstring("parsed\n\nAuthor: someone"));
        assert_eq!(meta.description.as_deref(), Some("explicit"));
        assert_eq!(meta.author.as_deref(), Some("someone"));
    }

    #[test]
    fn test_info_rows() {
        let meta = Metadata::default().description("d").author("a");
        let rows = meta.info_rows("scanner");
        assert_eq!(rows[0], ("Name:".to_string(), "scanner".to_string()));
        assert!(rows.contains(&("Author:".to_string(), "a".to_string())));
    }
}
