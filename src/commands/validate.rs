//! # Validate Command Implementation
//!
//! Loads the configuration file the way a build cycle would and reports
//! either a short summary or every problem found. This command is read-only:
//! it neither contacts GitHub nor touches the working directory.

use anyhow::Result;

use modforge::config::ValidConfig;
use modforge::error::Error;

use crate::cli::GlobalArgs;

/// Execute the `validate` command.
pub fn execute(globals: &GlobalArgs) -> Result<()> {
    let path = &globals.config;
    println!("Validating configuration: {}", path.display());

    match super::load_config(path) {
        Ok(config) => {
            print_summary(&config);
            println!("\nConfiguration is valid");
            Ok(())
        }
        Err(e) => {
            if let Some(Error::ConfigInvalid { problems }) = e.downcast_ref::<Error>() {
                println!("\nFound {} problem(s):", problems.len());
                for problem in problems {
                    println!("  - {problem}");
                }
            }
            Err(e)
        }
    }
}

fn print_summary(config: &ValidConfig) {
    let github = &config.github;
    let patterns: usize = github.mods.iter().map(|spec| spec.patterns.len()).sum();

    println!("\nConfiguration Summary:");
    println!("   Framework: {}", github.framework);
    println!("   Accounts: {}", github.mods.len());
    println!("   Repository patterns: {patterns}");
    println!(
        "   Metadata lookups: {}",
        github.mods.iter().filter(|spec| spec.metadata).count()
    );
    println!("   Build every: {:?}", config.every);
    println!("   Deploy: {} -> {}", config.deploy.remote, config.deploy.script);
    match &config.snail {
        Some(address) => println!("   Notify: {address}"),
        None => println!("   Notify: log only"),
    }
}
