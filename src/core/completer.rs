// src/core/completer.rs

//! Tab completion of command names, keys and values.

use crate::core::command::{Arity, CommandContext};
use crate::core::tokenizer;
use crate::system::input::Candidate;
use std::fmt;

/// Completes command names, keys and values for the line being typed.
///
/// Handles the `COMMAND`, `COMMAND VALUE` and `COMMAND KEY VALUE` forms.
pub struct CommandCompleter<'a, 'c> {
    ctx: &'a CommandContext<'c>,
}

impl fmt::Debug for CommandCompleter<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCompleter")
            .field("level", &self.ctx.console.level())
            .finish()
    }
}

/// Case-insensitively sorted, deduplicated, optionally prefix-filtered.
fn filter_sort(items: Vec<String>, prefix: Option<&str>) -> Vec<String> {
    let mut items = items;
    items.sort_by_key(|s| s.to_lowercase());
    items.dedup();
    items
        .into_iter()
        .filter(|x| prefix.is_none_or(|p| x.starts_with(p)))
        .collect()
}

impl<'a, 'c> CommandCompleter<'a, 'c> {
    /// A completer for the console of `ctx`.
    pub fn new(ctx: &'a CommandContext<'c>) -> Self {
        Self { ctx }
    }

    /// Candidates for `text`, the line typed so far.
    ///
    /// A partial token is replaced from its own start; after a trailing
    /// space, candidates are inserted at the end of the line. A partial
    /// token opened with a quote gets its candidates quoted the same way.
    pub fn complete(&self, text: &str) -> Vec<Candidate> {
        let console = self.ctx.console;
        let tokens = console.tokenize(text);
        if tokens.len() > 3 {
            return Vec::new();
        }
        let trailing = text.len() - text.trim_end_matches(' ').len();
        let end = text.len();
        let starts = tokenizer::token_starts(text);

        let at_end = |items: Vec<String>| -> Vec<Candidate> {
            items.into_iter().map(|text| Candidate { text, start: end }).collect()
        };
        // Replaces the token at `index` of the tokenized line.
        let at_token = |items: Vec<String>, index: usize| -> Vec<Candidate> {
            let (start, quote) = starts.get(index).copied().unwrap_or((end, None));
            items
                .into_iter()
                .map(|text| Candidate {
                    text: match quote {
                        Some(q) => format!("{q}{text}{q}"),
                        None => text,
                    },
                    start,
                })
                .collect()
        };

        let Some(name) = tokens.first() else {
            return at_end(filter_sort(console.command_names(), None));
        };
        let instance = console.instance(name);

        match (tokens.len(), instance) {
            (1, _) if trailing == 0 => at_token(filter_sort(console.command_names(), Some(name)), 0),
            (1, Some(command)) => {
                let command = command.borrow();
                match command.signature().arity() {
                    Arity::Value => at_end(filter_sort(command.complete_values(self.ctx, None), None)),
                    Arity::KeyValue => at_end(filter_sort(command.complete_keys(self.ctx), None)),
                    Arity::Niladic => Vec::new(),
                }
            }
            (2, Some(command)) => {
                let command = command.borrow();
                let partial = tokens.get(1).map(String::as_str);
                match (command.signature().arity(), trailing) {
                    (Arity::Value, 0) => at_token(filter_sort(command.complete_values(self.ctx, None), partial), 1),
                    (Arity::KeyValue, 0) => at_token(filter_sort(command.complete_keys(self.ctx), partial), 1),
                    (Arity::KeyValue, _) => {
                        let key = partial.unwrap_or_default();
                        if command.complete_keys(self.ctx).iter().any(|k| k == key) {
                            at_end(filter_sort(command.complete_values(self.ctx, Some(key)), None))
                        } else {
                            Vec::new()
                        }
                    }
                    _ => Vec::new(),
                }
            }
            (3, Some(command)) if trailing == 0 => {
                let command = command.borrow();
                let key = tokens.get(1).map(String::as_str).unwrap_or_default();
                if command.signature().arity() == Arity::KeyValue
                    && command.complete_keys(self.ctx).iter().any(|k| k == key)
                {
                    at_token(
                        filter_sort(
                            command.complete_values(self.ctx, Some(key)),
                            tokens.get(2).map(String::as_str),
                        ),
                        2,
                    )
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use crate::core::application::{AppSettings, Application};
    use crate::core::loader::LoadOptions;
    use crate::core::shell::Shell;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn shell(dir: &TempDir) -> Shell {
        let mut root_defaults = BTreeMap::new();
        root_defaults.insert("APP_FOLDER".to_string(), dir.path().join("app").display().to_string());
        root_defaults.insert("WORKSPACE".to_string(), dir.path().join("ws").display().to_string());
        Shell::new(Application::with_settings(AppSettings {
            appname: "tk".to_string(),
            load: LoadOptions {
                plugins: vec![commands::BASE],
                ..LoadOptions::default()
            },
            root_defaults,
            ..AppSettings::default()
        }))
        .unwrap()
    }

    fn complete(shell: &mut Shell, text: &str) -> Vec<Candidate> {
        shell
            .with_context(|ctx| CommandCompleter::new(ctx).complete(text))
            .unwrap()
    }

    fn texts(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_filter_sort() {
        let items = vec!["b".to_string(), "A".into(), "a".into(), "b".into(), "Ab".into()];
        assert_eq!(filter_sort(items.clone(), None), vec!["A", "a", "Ab", "b"]);
        assert_eq!(filter_sort(items, Some("A")), vec!["A", "Ab"]);
    }

    #[test]
    fn test_complete_command_names() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);

        let all = complete(&mut shell, "");
        assert!(texts(&all).contains(&"help"));
        assert!(all.iter().all(|c| c.start == 0));

        let partial = complete(&mut shell, "se");
        assert_eq!(texts(&partial), vec!["search", "select", "set", "setg"]);
        assert!(partial.iter().all(|c| c.start == 0));

        assert!(complete(&mut shell, "help ").is_empty());
    }

    #[test]
    fn test_complete_keys_after_trailing_space() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        let keys = complete(&mut shell, "set ");
        assert!(texts(&keys).contains(&"DEBUG"));
        assert!(texts(&keys).contains(&"WORKSPACE"));
        assert!(keys.iter().all(|c| c.start == 4));

        let partial = complete(&mut shell, "show options DE");
        assert_eq!(texts(&partial), vec!["DEBUG"]);
        assert_eq!(partial[0].start, 13);
    }

    #[test]
    fn test_complete_values() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        let values = complete(&mut shell, "set DEBUG ");
        assert_eq!(texts(&values), vec!["false", "true"]);
        assert!(values.iter().all(|c| c.start == 10));

        let partial = complete(&mut shell, "set DEBUG t");
        assert_eq!(partial, vec![Candidate { text: "true".to_string(), start: 10 }]);

        assert!(complete(&mut shell, "set NOPE ").is_empty());
        assert!(complete(&mut shell, "set DEBUG true extra words").is_empty());
    }

    #[test]
    fn test_complete_quoted_partial_value() {
        let dir = TempDir::new().unwrap();
        let mut shell = shell(&dir);
        let quoted = complete(&mut shell, r#"set DEBUG "t"#);
        assert_eq!(quoted, vec![Candidate { text: r#""true""#.to_string(), start: 10 }]);
    }
}
