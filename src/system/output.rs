// src/system/output.rs

//! Console output: a writer that can be switched to capture mode, plus the
//! table and style helpers used by the base commands.

use colored::{Color, ColoredString, Colorize};
use std::cell::RefCell;

/// Where command output goes. While capturing, text is buffered instead of
/// printed so that scripted runs can pair each command with its output.
#[derive(Debug, Default)]
pub struct Output {
    capture: RefCell<Option<String>>,
}

impl Output {
    /// Writes `text` to stdout, or to the capture buffer.
    pub fn print(&self, text: &str) {
        match self.capture.borrow_mut().as_mut() {
            Some(buffer) => buffer.push_str(text),
            None => print!("{text}"),
        }
    }

    /// Like [`Output::print`], with a newline.
    pub fn println(&self, text: &str) {
        match self.capture.borrow_mut().as_mut() {
            Some(buffer) => {
                buffer.push_str(text);
                buffer.push('\n');
            }
            None => println!("{text}"),
        }
    }

    /// Buffers output until [`Output::stop_capture`].
    pub fn start_capture(&self) {
        *self.capture.borrow_mut() = Some(String::new());
    }

    /// Returns what was captured since the last call and keeps capturing.
    pub fn take_captured(&self) -> String {
        self.capture
            .borrow_mut()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Ends capturing and returns the buffer.
    pub fn stop_capture(&self) -> String {
        self.capture.borrow_mut().take().unwrap_or_default()
    }

    /// Whether output is being buffered.
    pub fn is_capturing(&self) -> bool {
        self.capture.borrow().is_some()
    }
}

// --- Tables ---

/// A titled, column-aligned table.
#[derive(Debug, Clone, Default)]
pub struct Table {
    title: Option<String>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// An empty table with the given column headers.
    pub fn new(headers: &[&str]) -> Self {
        Self {
            title: None,
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// A table without header line, e.g. for key/value listings.
    pub fn headless() -> Self {
        Self::default()
    }

    /// Sets the title shown above the table.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Appends a row; missing cells render empty.
    pub fn row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    /// Whether no row was added.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);
        (0..columns)
            .map(|i| {
                self.rows
                    .iter()
                    .chain(std::iter::once(&self.headers))
                    .filter_map(|r| r.get(i))
                    .map(|c| c.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn line(cells: &[String], widths: &[usize]) -> String {
        let padded: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, w)| format!("{:<w$}", cells.get(i).map(String::as_str).unwrap_or(""), w = *w))
            .collect();
        format!("  {}", padded.join("  ").trim_end())
    }

    /// The table as text, columns padded to their widest cell.
    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut out = String::from("\n");
        if let Some(title) = &self.title {
            out.push_str(&format!("{}\n{}\n\n", title.bold(), "=".repeat(title.chars().count())));
        }
        if !self.headers.is_empty() {
            out.push_str(&Self::line(&self.headers, &widths));
            out.push('\n');
            let rule: Vec<String> = self
                .headers
                .iter()
                .map(|h| "-".repeat(h.chars().count()))
                .collect();
            out.push_str(&Self::line(&rule, &widths));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&Self::line(row, &widths));
            out.push('\n');
        }
        out
    }
}

// --- Styles ---

/// Applies a style spec such as `"bold #ff0000"` or `"underline blue"`.
/// Unknown words are ignored.
pub fn apply_style(text: &str, spec: &str) -> ColoredString {
    let mut styled = text.normal();
    for word in spec.split_whitespace() {
        styled = match word {
            "bold" => styled.bold(),
            "italic" => styled.italic(),
            "underline" => styled.underline(),
            "dimmed" => styled.dimmed(),
            hex if hex.starts_with('#') => match parse_hex(hex) {
                Some((r, g, b)) => styled.truecolor(r, g, b),
                None => styled,
            },
            name => match name.parse::<Color>() {
                Ok(color) => styled.color(color),
                Err(()) => styled,
            },
        };
    }
    styled
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// `Y`/`N` marker used in option tables.
pub fn yes_no(flag: bool) -> &'static str {
    if flag { "Y" } else { "N" }
}
