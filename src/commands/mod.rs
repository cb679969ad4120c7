//! # CLI Command Implementations
//!
//! Each subcommand of the `modforge` command-line tool lives in its own file
//! with:
//! - An `Args` struct for its own options, derived using `clap` (if it has
//!   any).
//! - An `execute` function taking those and the global options, calling into
//!   the `modforge` library for the actual work.

pub mod build;
pub mod run;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;

use modforge::config::{self, ValidConfig};
use modforge::exec::ExecContext;
use modforge::suggestions;

/// Loads and validates the configuration for a command.
pub fn load_config(path: &Path) -> Result<ValidConfig> {
    if !path.exists() {
        return Err(suggestions::config_not_found(path));
    }

    config::load(path).with_context(|| format!("Couldn't load config: {}", path.display()))
}

/// Makes SIGINT and SIGTERM wait for running commands, then exit with 0.
pub fn install_shutdown_handler(ctx: Arc<ExecContext>) -> Result<()> {
    ctrlc::set_handler(move || {
        warn!("Terminating");
        // Held until the process is gone, so nothing new starts meanwhile.
        let _quiesced = ctx.shutdown();
        std::process::exit(0);
    })
    .context("Couldn't install signal handler")
}
