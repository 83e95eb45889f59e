// src/core/template.rs

//! `{name}` placeholder substitution shared by the option value pipeline
//! and the command templates of manifest entities.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    /// Console attribute placeholders: lowercase names only.
    static ref ATTRIBUTE_RE: Regex = Regex::new(r"\{([a-z]+)\}").expect("valid attribute regex");
    /// Manifest placeholders: option names, argument indices or lowercase attributes.
    static ref TEMPLATE_RE: Regex =
        Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid template regex");
}

/// Replaces `{attr}` placeholders with values returned by `lookup`.
///
/// Unknown attributes are replaced by an empty string.
pub fn substitute_attributes<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ATTRIBUTE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            caps.get(1)
                .and_then(|m| lookup(m.as_str()))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Expands a command template, leaving unknown placeholders untouched so
/// that shell braces survive.
pub fn expand_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    TEMPLATE_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            caps.get(1)
                .and_then(|m| lookup(m.as_str()))
                .unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

/// Lists the placeholders referenced by a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in TEMPLATE_RE.captures_iter(template) {
        if let Some(m) = caps.get(1) {
            let name = m.as_str().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_known_and_unknown_attributes() {
        let result = substitute_attributes("~/.{appname}/{missing}", |name| match name {
            "appname" => Some("tierkit".to_string()),
            _ => None,
        });
        assert_eq!(result, "~/.tierkit/");
    }

    #[test]
    fn test_attribute_placeholders_are_lowercase_only() {
        let result = substitute_attributes("{WORKSPACE}/{appname}", |_| Some("x".to_string()));
        assert_eq!(result, "{WORKSPACE}/x");
    }

    #[test]
    fn test_expand_template_keeps_unknown_placeholders() {
        let result = expand_template("nmap {TARGET} -p {0} {unknown}", |name| match name {
            "TARGET" => Some("10.0.0.1".to_string()),
            "0" => Some("80".to_string()),
            _ => None,
        });
        assert_eq!(result, "nmap 10.0.0.1 -p 80 {unknown}");
    }

    #[test]
    fn test_placeholders_are_deduplicated() {
        assert_eq!(placeholders("{A} {b} {A} {1}"), vec!["A", "b", "1"]);
    }
}
