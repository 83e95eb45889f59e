// src/cli/mod.rs

//! Command-line arguments, logger setup and the built-in plugin.

use crate::core::application::AppSettings;
use crate::core::loader::{LoadOptions, Sources};
use clap::Parser;
use log::LevelFilter;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

pub mod commands;
pub mod consoles;

/// tierkit: a hierarchical console framework with discoverable commands
/// and modules.
///
/// Starts the root console. Entities (commands, modules) are discovered
/// from the `--source` folders; a `banners/` or `lib/` subfolder of a
/// source is used for banners and extra executables.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// Execute the commands of an rc file, then exit.
    #[arg(short, long, value_name = "FILE")]
    pub rcfile: Option<PathBuf>,

    /// Development mode (reload-friendly, verbose loading).
    #[arg(short, long)]
    pub dev: bool,

    /// Start with the DEBUG option enabled.
    #[arg(short = 'v', long)]
    pub debug: bool,

    /// Folder to load entities from (repeatable).
    #[arg(short, long = "source", value_name = "DIR")]
    pub sources: Vec<PathBuf>,

    /// Workspace folder of the root console.
    #[arg(short, long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Application name, used in the prompt and the default app folder.
    #[arg(long, default_value = "tierkit")]
    pub appname: String,
}

impl Cli {
    /// Turns the arguments into application settings with the base
    /// command set as plugin.
    pub fn settings(&self) -> AppSettings {
        let mut sources = Sources {
            entities: self.sources.clone(),
            ..Sources::default()
        };
        for source in &self.sources {
            let banners = source.join("banners");
            if banners.is_dir() {
                sources.banners.push(banners);
            }
            let lib = source.join("lib");
            if lib.is_dir() {
                sources.libraries.push(lib);
            }
        }

        let mut root_defaults = BTreeMap::new();
        if let Some(workspace) = &self.workspace {
            root_defaults.insert("WORKSPACE".to_string(), workspace.display().to_string());
        }
        if self.debug {
            root_defaults.insert("DEBUG".to_string(), "true".to_string());
        }

        AppSettings {
            appname: self.appname.clone(),
            sources,
            load: LoadOptions {
                plugins: vec![commands::BASE],
                dev: self.dev,
                ..LoadOptions::default()
            },
            root_defaults,
        }
    }
}

/// Installs the logger.
///
/// The logger itself lets records down to `debug` through, so the global
/// max level is the only gate; the root `DEBUG` option moves it between
/// `info` and `debug`. `RUST_LOG` overrides the filter and, when set, the
/// starting level.
///
/// # Errors
/// Fails if a logger is already installed.
pub fn init_logging() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Debug)
        .parse_env(env_logger::Env::default())
        .format_timestamp(None)
        .format_target(false)
        .try_init()?;
    if env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
    Ok(())
}
