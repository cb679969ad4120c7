//! Run command implementation
//!
//! Loops over build cycles: reload the configuration, wait for the next
//! build, build, deploy, notify. With `--once` a single cycle runs right away
//! and its outcome becomes the exit status.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use modforge::build::Workdir;
use modforge::exec::ExecContext;
use modforge::schedule::{self, RunOptions};

use crate::cli::GlobalArgs;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run one cycle immediately and exit
    #[arg(long)]
    pub once: bool,
}

/// Execute the run command
pub fn execute(args: RunArgs, globals: &GlobalArgs) -> Result<()> {
    if args.once {
        // Fail fast with hints instead of a bare I/O error.
        super::load_config(&globals.config)?;
    }

    let ctx = Arc::new(ExecContext::from_available_parallelism());
    super::install_shutdown_handler(Arc::clone(&ctx))?;

    let options = RunOptions {
        once: args.once,
        log_level: globals.log_level,
    };
    schedule::run(&ctx, &Workdir::new(&globals.workdir), &globals.config, options)?;
    Ok(())
}
