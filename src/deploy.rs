//! Publishing the build script through a git repository.
//!
//! The deploy repository is cloned once into `<workdir>/deploy` and brought
//! up to date before every deploy. The script is committed only if it
//! changed; the push happens either way, so a previously failed push is
//! retried on the next cycle.

use std::fs;
use std::path::Path;

use log::{debug, error, info, trace};

use crate::build::Workdir;
use crate::config::DeploySettings;
use crate::error::{Error, Result};
use crate::exec::ExecContext;
use crate::git::ORIGIN;

/// What a deploy did to the deploy repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// The script changed and a commit was pushed.
    Committed,
    /// The script was already up to date.
    Unchanged,
}

/// Deploys `script` as configured by `settings`.
pub fn deploy(
    ctx: &ExecContext,
    settings: &DeploySettings,
    workdir: &Workdir,
    script: &[u8],
) -> Result<Deployment> {
    let local = workdir.deploy();
    let git = |dir: &Path, args: &[&str]| -> Result<Vec<u8>> {
        let args = git_args(settings, args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        ctx.run(dir, "git", &args)
    };

    info!(
        "Pulling Git repo: remote={} local={}",
        settings.remote,
        local.display()
    );

    match fs::metadata(&local) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Cloning Git repo: local={}", local.display());

            let staging = tempfile::Builder::new()
                .prefix("deploy-")
                .tempdir_in(workdir.tmp())?;
            git(staging.path(), &["clone", "--", &settings.remote, "."])?;
            rename(staging.path(), &local)?;
        }
        Err(e) => {
            error!("Stat error: path={} error={}", local.display(), e);
            return Err(e.into());
        }
    }

    git(&local, &["remote", "set-url", "--", ORIGIN, &settings.remote])?;
    git(&local, &["reset", "--hard"])?;
    git(&local, &["pull", "--rebase"])?;

    write_script(&local.join(&settings.script), script)?;

    git(&local, &["add", "--", &settings.script])?;
    let status = git(&local, &["status", "-s"])?;

    let deployment = if status.is_empty() {
        info!("Build script unchanged: script={}", settings.script);
        Deployment::Unchanged
    } else {
        git(&local, &["commit", "-m", &settings.commit])?;
        Deployment::Committed
    };

    git(&local, &["push"])?;
    Ok(deployment)
}

/// `-c key=value` for every configured pair (sorted by key), then `args`.
pub fn git_args(settings: &DeploySettings, args: &[&str]) -> Vec<String> {
    settings
        .config
        .iter()
        .flat_map(|(key, value)| ["-c".to_string(), format!("{key}={value}")])
        .chain(args.iter().map(|arg| arg.to_string()))
        .collect()
}

fn rename(old: &Path, new: &Path) -> Result<()> {
    trace!("Renaming: old={} new={}", old.display(), new.display());

    fs::rename(old, new).map_err(|e| {
        error!(
            "Couldn't rename: old={} new={} error={}",
            old.display(),
            new.display(),
            e
        );
        Error::Io(e)
    })
}

/// Writes an executable file, creating parent directories as needed.
fn write_script(path: &Path, content: &[u8]) -> Result<()> {
    trace!("Writing file: file={}", path.display());

    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        }

        Ok(())
    };

    write().map_err(|e| {
        error!("Couldn't write file: file={} error={}", path.display(), e);
        Error::Io(e)
    })
}
