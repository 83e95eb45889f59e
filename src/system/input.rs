// src/system/input.rs

//! Line readers feeding the console loop.

use crate::system::history::FileHistory;
use dialoguer::theme::Theme;
use dialoguer::{Completion, Input};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::io::{self, BufRead, ErrorKind, IsTerminal, Write};

/// Result of reading one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl+C: the current line is dropped, the loop goes on.
    Interrupted,
    /// Ctrl+D or end of the input stream.
    Eof,
}

/// A completion candidate replacing the text from byte offset `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub start: usize,
}

/// What the reader may ask the console while a line is typed.
pub trait LineAssist {
    fn complete(&self, text: &str) -> Vec<Candidate>;
    fn validate(&self, text: &str) -> Result<(), String>;
}

/// Source of console input lines.
pub trait LineReader {
    fn read_line(&mut self, prompt: &str, assist: &dyn LineAssist) -> io::Result<ReadOutcome>;
}

/// Picks the interactive reader on a capable terminal, the plain one otherwise.
pub fn default_reader(history: FileHistory) -> Box<dyn LineReader> {
    if supports_interactive_input() {
        Box::new(InteractiveReader::new(history))
    } else {
        Box::new(StdinReader)
    }
}

fn supports_interactive_input() -> bool {
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return false;
    }
    if let Ok(term) = env::var("TERM")
        && term.eq_ignore_ascii_case("dumb")
    {
        return false;
    }
    true
}

// --- Interactive ---

/// Prints the already styled prompt as is.
struct PromptTheme;

impl Theme for PromptTheme {
    fn format_input_prompt(&self, f: &mut dyn fmt::Write, prompt: &str, _default: Option<&str>) -> fmt::Result {
        write!(f, "{prompt}")
    }

    fn format_error(&self, f: &mut dyn fmt::Write, err: &str) -> fmt::Result {
        write!(f, "{err}")
    }
}

struct CompletionAdapter<'a> {
    assist: &'a dyn LineAssist,
}

impl Completion for CompletionAdapter<'_> {
    /// Completes to the single candidate, or to the longest prefix shared by
    /// every candidate.
    fn get(&self, input: &str) -> Option<String> {
        let candidates = self.assist.complete(input);
        let first = candidates.first()?;
        let start = first.start.min(input.len());
        let common = candidates.iter().skip(1).fold(first.text.clone(), |acc, c| {
            acc.chars()
                .zip(c.text.chars())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect()
        });
        let head = input.get(..start)?;
        let typed = input.get(start..).unwrap_or_default();
        if candidates.len() == 1 {
            return Some(format!("{head}{common} "));
        }
        (common.len() > typed.len()).then(|| format!("{head}{common}"))
    }
}

/// A terminal reader with completion, validation and history.
#[derive(Debug)]
pub struct InteractiveReader {
    history: FileHistory,
}

impl InteractiveReader {
    /// A reader recording accepted lines in `history`.
    pub fn new(history: FileHistory) -> Self {
        Self { history }
    }
}

impl LineReader for InteractiveReader {
    fn read_line(&mut self, prompt: &str, assist: &dyn LineAssist) -> io::Result<ReadOutcome> {
        let completion = CompletionAdapter { assist };
        let result = Input::<String>::with_theme(&PromptTheme)
            .with_prompt(prompt)
            .allow_empty(true)
            .report(false)
            .history_with(&mut self.history)
            .completion_with(&completion)
            .validate_with(|line: &String| assist.validate(line))
            .interact_text();
        match result {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(dialoguer::Error::IO(e)) => match e.kind() {
                ErrorKind::Interrupted => Ok(ReadOutcome::Interrupted),
                ErrorKind::UnexpectedEof => Ok(ReadOutcome::Eof),
                _ => Err(e),
            },
        }
    }
}

// --- Non-interactive ---

/// Plain line reader for pipes and dumb terminals.
#[derive(Debug)]
pub struct StdinReader;

impl LineReader for StdinReader {
    fn read_line(&mut self, prompt: &str, _assist: &dyn LineAssist) -> io::Result<ReadOutcome> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(_) => Ok(ReadOutcome::Line(line.trim_end_matches(['\r', '\n']).to_string())),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::Interrupted),
            Err(e) => Err(e),
        }
    }
}

/// Feeds a fixed list of lines, then reports end of input.
#[derive(Debug, Default)]
pub struct ScriptReader {
    lines: VecDeque<String>,
    prompts: Vec<String>,
}

impl ScriptReader {
    /// A reader returning `lines`, then [`ReadOutcome::Eof`].
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        }
    }

    /// Prompts shown so far, in order.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl LineReader for ScriptReader {
    fn read_line(&mut self, prompt: &str, _assist: &dyn LineAssist) -> io::Result<ReadOutcome> {
        self.prompts.push(prompt.to_string());
        Ok(self
            .lines
            .pop_front()
            .map_or(ReadOutcome::Eof, ReadOutcome::Line))
    }
}
