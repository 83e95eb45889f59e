// src/core/mod.rs

//! Entities, consoles, configuration and the dispatch loop.

pub mod application;
pub mod command;
pub mod completer;
pub mod config;
pub mod console;
pub mod entity;
pub mod loader;
pub mod manifest;
pub mod metadata;
pub mod module;
pub mod registry;
pub mod requirements;
pub mod shell;
pub mod template;
pub mod tokenizer;
pub mod validator;
