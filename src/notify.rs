//! Reporting repositories the module patterns don't cover.

use std::collections::BTreeSet;
use std::path::Path;

use log::{error, info, trace, warn};

use crate::build::Workdir;
use crate::discovery::UnknownRepo;
use crate::exec::ExecContext;
use crate::git::GitOperations;
use crate::identity::METADATA_FILE;
use crate::mirror::MirrorKey;
use crate::version::HEAD;

/// Subject of the notification mail.
pub const SUBJECT: &str = "modforge discovered new repos";

/// Drops the repositories known not to be modules: those mirrored without a
/// `module.info` at `HEAD`.
///
/// Repositories without a mirror, or whose mirror can't be inspected, stay.
pub fn uncovered(
    git: &dyn GitOperations,
    mirrors: &Path,
    unknown: &BTreeSet<UnknownRepo>,
) -> Vec<UnknownRepo> {
    unknown
        .iter()
        .filter(|repo| {
            let mirror = mirrors.join(MirrorKey::for_repo(&repo.owner, &repo.name).as_str());
            if !mirror.is_dir() {
                return true;
            }

            match git.has_file(&mirror, HEAD, METADATA_FILE) {
                Ok(false) => {
                    trace!("Not a module: repo={}", repo);
                    false
                }
                _ => true,
            }
        })
        .cloned()
        .collect()
}

/// Body of the notification mail.
pub fn message(web: &str, repos: &[UnknownRepo]) -> String {
    let mut body = String::from(
        "modforge scanned the repositories as configured and discovered ones \
         which aren't covered by any configured repository pattern \
         (per repository owner):\n\n",
    );

    for repo in repos {
        body.push_str(&format!("* {web}{}/{}\n", repo.owner, repo.name));
    }

    body.push_str(
        "\n\nPlease configure additional patterns which cover them by either \
         including ( \\Aiw2-mod-(.+)\\z ) or ignoring ( \\Ano-mod-() ).\n",
    );
    body
}

/// Logs the uncovered repositories and mails them to `snail`, if set.
///
/// Failures are logged, never returned: a missed notification is repeated
/// on the next cycle anyway.
pub fn notify(
    ctx: &ExecContext,
    git: &dyn GitOperations,
    workdir: &Workdir,
    web: &str,
    snail: Option<&str>,
    unknown: &BTreeSet<UnknownRepo>,
) {
    let repos = uncovered(git, &workdir.mirrors(), unknown);

    if repos.is_empty() {
        trace!("The repository patterns covered all repositories");
        return;
    }

    let listed: Vec<String> = repos.iter().map(ToString::to_string).collect();
    warn!(
        "The repository patterns didn't cover some repositories: repos={}",
        listed.join(",")
    );

    let Some(address) = snail else {
        return;
    };

    info!("Notifying via s-nail: email={}", address);

    let body = message(web, &repos);
    if let Err(e) = ctx.run_with_stdin(
        workdir.root(),
        "s-nail",
        &["-s", SUBJECT, address],
        Some(body.as_bytes()),
    ) {
        error!("Couldn't notify via s-nail: email={} error={}", address, e);
    }
}
