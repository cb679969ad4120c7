//! Build command implementation
//!
//! Runs the build part of one cycle (discovery, mirrors, versions, script)
//! and prints the script or writes it to a file. Nothing is deployed and
//! nobody is notified.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use log::warn;

use modforge::build::Workdir;
use modforge::exec::ExecContext;
use modforge::schedule;

use crate::cli::GlobalArgs;

/// Arguments for the build command
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Write the script to this file instead of standard output
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Execute the build command
pub fn execute(args: BuildArgs, globals: &GlobalArgs) -> Result<()> {
    let config = super::load_config(&globals.config)?;
    log::set_max_level(globals.log_level.unwrap_or(config.log_level));

    let ctx = Arc::new(ExecContext::from_available_parallelism());
    super::install_shutdown_handler(Arc::clone(&ctx))?;

    let output = schedule::build_once(&ctx, &Workdir::new(&globals.workdir), &config)
        .context("Build failed")?;

    for repo in &output.unknown {
        warn!("Repository not covered by any pattern: repo={}", repo);
    }

    match args.output {
        Some(path) => fs::write(&path, &output.script)
            .with_context(|| format!("Couldn't write script: {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&output.script)
            .context("Couldn't write script to standard output")?,
    }

    Ok(())
}
