// src/core/validator.rs

//! As-you-type validation of console lines.

use crate::core::command::{CommandContext, CommandError};
use std::fmt;

/// Checks a line as it is typed, producing the message shown under the prompt.
pub struct InputValidator<'a, 'c> {
    ctx: &'a CommandContext<'c>,
}

impl fmt::Debug for InputValidator<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputValidator")
            .field("level", &self.ctx.console.level())
            .finish()
    }
}

impl<'a, 'c> InputValidator<'a, 'c> {
    /// A validator for the console of `ctx`.
    pub fn new(ctx: &'a CommandContext<'c>) -> Self {
        Self { ctx }
    }

    /// Checks a typed line before it is accepted.
    ///
    /// # Errors
    ///
    /// Returns the message to show under the prompt.
    pub fn validate(&self, text: &str) -> Result<(), String> {
        let console = self.ctx.console;
        let tokens = console.tokenize(text.trim());
        let Some((name, args)) = tokens.split_first() else {
            return Ok(());
        };
        let Some(command) = console.instance(name) else {
            return Err(if args.is_empty() { "Unknown command" } else { "Bad command" }.to_string());
        };
        let command = command.borrow();
        command.validate(self.ctx, args).map_err(|e| {
            let usage = command.signature().usage(name);
            match e {
                CommandError::Arity { .. } => format!("Command syntax: {usage}"),
                other => {
                    let message = other.to_string();
                    if message.is_empty() {
                        format!("Command syntax: {usage}")
                    } else {
                        format!("Command syntax: {usage} ({message})")
                    }
                }
            }
        })
    }
}
