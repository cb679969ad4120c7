//! # Periodic Build Loop
//!
//! The configuration is re-read at the start of every cycle, so edits take
//! effect without a restart. A cycle then waits for `build.every`, wipes the
//! scratch directory, builds, deploys the script and reports uncovered
//! repositories. A failed cycle is logged and retried on schedule.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{error, info, trace, LevelFilter};

use crate::build::{build, BuildOutput, Workdir};
use crate::config::{self, ValidConfig};
use crate::deploy::deploy;
use crate::discovery::GitHubClient;
use crate::error::Result;
use crate::exec::ExecContext;
use crate::git::SystemGit;
use crate::notify::notify;

/// Wait before re-reading a configuration that never loaded.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// How the loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run a single cycle right away and return its result.
    pub once: bool,
    /// Level set on the command line, taking precedence over `log.level`.
    pub log_level: Option<LevelFilter>,
}

/// Runs build cycles until the process is terminated.
///
/// Returns only with `once`, or if the loop cannot continue at all.
pub fn run(
    ctx: &ExecContext,
    workdir: &Workdir,
    config_path: &Path,
    options: RunOptions,
) -> Result<()> {
    let mut last_interval = None;

    loop {
        info!("Loading config: path={}", config_path.display());

        let config = match config::load(config_path) {
            Ok(config) => config,
            Err(e) if options.once => return Err(e),
            Err(e) => {
                let retry = last_interval.unwrap_or(RETRY_INTERVAL);
                error!(
                    "Couldn't load config: path={} error={} retry_in={:?}",
                    config_path.display(),
                    e,
                    retry
                );
                thread::sleep(retry);
                continue;
            }
        };

        let level = options.log_level.unwrap_or(config.log_level);
        trace!("Changing log level: old={} new={}", log::max_level(), level);
        log::set_max_level(level);

        if options.once {
            return cycle(ctx, workdir, &config).map(drop);
        }

        last_interval = Some(config.every);
        info!("Scheduling next build: in={:?}", config.every);
        thread::sleep(config.every);

        if let Err(e) = cycle(ctx, workdir, &config) {
            error!("Build cycle failed: error={}", e);
        }
    }
}

/// Builds, deploys and notifies once.
pub fn cycle(ctx: &ExecContext, workdir: &Workdir, config: &ValidConfig) -> Result<BuildOutput> {
    let output = build_once(ctx, workdir, config)?;

    info!("Deploying");
    deploy(ctx, &config.deploy, workdir, &output.script)?;

    let git = SystemGit::new(ctx);
    notify(
        ctx,
        &git,
        workdir,
        &config.github.web,
        config.snail.as_deref(),
        &output.unknown,
    );

    Ok(output)
}

/// Builds once against GitHub and the system `git`, without deploying.
pub fn build_once(
    ctx: &ExecContext,
    workdir: &Workdir,
    config: &ValidConfig,
) -> Result<BuildOutput> {
    prepare_tmp(workdir)?;

    let git = SystemGit::new(ctx);
    let lister = GitHubClient::new(&config.github.api, config.github.token())?;

    info!("Building");
    build(config, &git, &lister, workdir)
}

/// Wipes and recreates the scratch directory.
pub fn prepare_tmp(workdir: &Workdir) -> Result<()> {
    let tmp = workdir.tmp();

    info!("Removing dir: path={}", tmp.display());
    match fs::remove_dir_all(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            error!("Couldn't remove dir: path={} error={}", tmp.display(), e);
            return Err(e.into());
        }
    }

    fs::create_dir_all(&tmp).map_err(|e| {
        error!("Couldn't create dir: path={} error={}", tmp.display(), e);
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_tmp_wipes_leftovers() {
        let temp = TempDir::new().unwrap();
        let workdir = Workdir::new(temp.path());
        fs::create_dir_all(workdir.tmp().join("mirror-abc")).unwrap();
        fs::write(workdir.tmp().join("stray"), "x").unwrap();

        prepare_tmp(&workdir).unwrap();

        assert!(workdir.tmp().is_dir());
        assert_eq!(fs::read_dir(workdir.tmp()).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_tmp_creates_missing() {
        let temp = TempDir::new().unwrap();
        let workdir = Workdir::new(temp.path().join("nested"));

        prepare_tmp(&workdir).unwrap();

        assert!(workdir.tmp().is_dir());
    }

    #[test]
    fn test_run_once_reports_bad_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "build:\n  every: soon\n").unwrap();

        let ctx = ExecContext::new(1);
        let options = RunOptions {
            once: true,
            log_level: None,
        };
        let err = run(&ctx, &Workdir::new(temp.path()), &path, options).unwrap_err();

        assert!(matches!(err, Error::ConfigInvalid { .. }));
        // Nothing was touched before the configuration was valid.
        assert!(!temp.path().join("tmp").exists());
    }

    #[test]
    fn test_run_once_reports_missing_config() {
        let temp = TempDir::new().unwrap();
        let ctx = ExecContext::new(1);
        let options = RunOptions {
            once: true,
            ..Default::default()
        };

        let err = run(
            &ctx,
            &Workdir::new(temp.path()),
            &temp.path().join("missing.yml"),
            options,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
    }
}
