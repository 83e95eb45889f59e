// src/core/tokenizer.rs

//! Shell-like splitting of console lines.

/// Closing characters tried, in order, when the input has an unterminated quote.
const QUOTE_SUFFIXES: [&str; 3] = ["", "\"", "'"];

/// Splits a command line on whitespace, honoring quotes.
///
/// Partial input with an unterminated quote is retried with a speculative
/// closing quote, first `"` then `'`. If every attempt fails, nothing is
/// returned.
pub fn split(text: &str) -> Vec<String> {
    let text = text.trim_start();
    QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| shlex::split(&format!("{text}{suffix}")))
        .unwrap_or_default()
}

/// Splits a command line and enforces the argument ceiling of the command.
///
/// For commands flagged `single_arg`, everything after the name is rejoined
/// into one argument. Otherwise, everything from the third token onwards is
/// rejoined into the third.
pub fn tokenize<F>(text: &str, is_single_arg: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut tokens = split(text);
    let Some(name) = tokens.first() else {
        return tokens;
    };
    let keep = if is_single_arg(name) { 1 } else { 2 };
    if tokens.len() > keep + 1 {
        let tail = tokens.split_off(keep).join(" ");
        tokens.push(tail);
    }
    tokens
}

/// Byte offset at which each raw token of `text` starts, with the quote
/// opening it, if any. Whitespace inside quotes does not split tokens.
pub fn token_starts(text: &str) -> Vec<(usize, Option<char>)> {
    let mut starts = Vec::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else if c == '\\' && q == '"' {
                escaped = true;
            }
            continue;
        }
        if c.is_whitespace() {
            in_token = false;
            continue;
        }
        if !in_token {
            in_token = true;
            starts.push((i, matches!(c, '"' | '\'').then_some(c)));
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '\\' => escaped = true,
            _ => {}
        }
    }
    starts
}
