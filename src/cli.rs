//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use modforge::config::{parse_log_level, DEFAULT_CONFIG_FILE};
use modforge::suggestions;

use crate::commands;

/// modforge - Assemble a deploy script from a framework and its discovered modules
#[derive(Parser, Debug)]
#[command(name = "modforge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    globals: GlobalArgs,
}

/// Options shared by all subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Set log level (error, warn, info, debug, trace), overriding the
    /// configuration and RUST_LOG
    #[arg(long, global = true, value_name = "LEVEL", value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,

    /// Directory holding the mirrors, the scratch space and the deploy clone
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Path to the configuration file
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "MODFORGE_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and deploy periodically, as scheduled by the configuration
    Run(commands::run::RunArgs),

    /// Build the script once and print it, without deploying
    Build(commands::build::BuildArgs),

    /// Check the configuration file and report every problem
    Validate,
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let globals = GlobalArgs {
            log_level: init_logging(self.globals.log_level),
            ..self.globals
        };

        match self.command {
            Commands::Run(args) => commands::run::execute(args, &globals),
            Commands::Build(args) => commands::build::execute(args, &globals),
            Commands::Validate => commands::validate::execute(&globals),
        }
    }
}

fn parse_level(level: &str) -> std::result::Result<LevelFilter, String> {
    parse_log_level(level).ok_or_else(|| suggestions::unknown_log_level(level))
}

/// Sets up `env_logger` and returns the level the configuration must not
/// override: the one from `--log-level`, else the one from `RUST_LOG`.
fn init_logging(cli_level: Option<LevelFilter>) -> Option<LevelFilter> {
    let from_env = std::env::var_os("RUST_LOG").is_some();

    // The logger itself lets everything through; `log::set_max_level` decides.
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("trace"),
    );
    if let Some(level) = cli_level {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis();
    // Fails only if a logger is already installed, which is fine.
    let _ = builder.try_init();

    match (cli_level, from_env) {
        (Some(level), _) => Some(level),
        (None, true) => Some(log::max_level()),
        (None, false) => {
            log::set_max_level(LevelFilter::Info);
            None
        }
    }
}
