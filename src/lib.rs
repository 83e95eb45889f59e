// src/lib.rs

//! tierkit: hierarchical, plugin-driven interactive consoles.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Raised by the interrupt handler; scripted replays stop when they see it.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod state;
pub mod system;
