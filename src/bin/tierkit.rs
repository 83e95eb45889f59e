// src/bin/tierkit.rs

//! The `tierkit` executable.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use tierkit::{
    cli::{self, Cli},
    constants::{DEFAULT_APP_FOLDER, HISTORY_FILENAME},
    core::{application::Application, shell::Shell},
    state::StateStore,
    system::{history::FileHistory, input, paths},
};

/// The main entry point of `tierkit`.
/// It sets up logging, parses arguments, runs the shell and performs
/// centralized error handling.
fn main() {
    if let Err(e) = cli::init_logging() {
        eprintln!("{}: {}", "Warning".yellow().bold(), e);
    }

    if let Err(e) = run(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// The application folder is needed before the root console exists, to
/// restore the shared state and the prompt history.
fn app_folder(appname: &str) -> Result<PathBuf> {
    let raw = DEFAULT_APP_FOLDER.replace("{appname}", appname);
    paths::expand_path(&raw).with_context(|| format!("Could not resolve the application folder '{raw}'"))
}

fn run(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    let folder = app_folder(&cli.appname)?;
    let state = StateStore::load(&Application::state_path(&folder))?;

    let app = Application::with_settings(cli.settings()).with_state(state);
    // Ctrl+C reaches running children directly; here it only stops replays.
    signal_hook::flag::register(signal_hook::consts::SIGINT, app.cancellation_token())
        .context("Could not install the interrupt handler")?;
    let mut shell = Shell::new(app)?;

    match &cli.rcfile {
        Some(path) => {
            shell.rcfile(path, false)?;
            shell.close_all();
        }
        None => {
            let mut reader = input::default_reader(FileHistory::open(&folder.join(HISTORY_FILENAME)));
            shell.start(reader.as_mut())?;
        }
    }
    Ok(())
}
