//! # Build Cycle
//!
//! One build turns the configuration into a deploy script:
//!
//! 1. list the repositories of all configured accounts and classify them,
//! 2. reconcile the mirror store with the framework, the assigned modules and
//!    the repositories to be identified through `module.info`,
//! 3. resolve the commit to pin for every mirror, concurrently, looking up
//!    the declared module identifier where needed,
//! 4. assemble the script from the resulting [`BuildPlan`].
//!
//! A build is all-or-nothing: if any stage fails, no script is produced and
//! the error is returned after everything already started has finished.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use log::{error, info, warn};

use crate::config::ValidConfig;
use crate::discovery::{classify, discover, RepoCandidate, RepoLister, UnknownRepo};
use crate::error::{Error, Result};
use crate::git::GitOperations;
use crate::identity::identify_with_fallback;
use crate::mirror::{MirrorEntry, MirrorKey, MirrorStore};
use crate::script::{assemble, BuildPlan};
use crate::version::{resolve, ResolvedVersion};

/// Directory layout below the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bare mirrors, one per expected repository.
    pub fn mirrors(&self) -> PathBuf {
        self.root.join("mirrors")
    }

    /// Scratch space, wiped before every cycle.
    pub fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Clone of the deploy repository.
    pub fn deploy(&self) -> PathBuf {
        self.root.join("deploy")
    }
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub script: Vec<u8>,
    pub plan: BuildPlan,
    /// Repositories no pattern or `module.info` accounted for.
    pub unknown: BTreeSet<UnknownRepo>,
}

/// What a mirror is expected for.
#[derive(Debug, Clone)]
enum Role {
    Framework,
    Module(String),
    Candidate(RepoCandidate),
}

/// Runs one build against the mirrors below `workdir`.
pub fn build(
    config: &ValidConfig,
    git: &dyn GitOperations,
    lister: &dyn RepoLister,
    workdir: &Workdir,
) -> Result<BuildOutput> {
    let github = &config.github;

    let discovered = discover(lister, &github.accounts())?;
    let classification = classify(&github.mods, &discovered, Some(&github.framework));

    let mut roles = BTreeMap::new();
    let mut expected = BTreeMap::new();
    let mut expect = |repo: &RepoCandidate, role: Role| {
        let key = MirrorKey::for_repo(&repo.owner, &repo.name);
        expected.insert(key.clone(), github.remote_of(repo));
        roles.insert(key, role);
    };

    expect(&github.framework, Role::Framework);
    for (module, repo) in &classification.modules {
        expect(repo, Role::Module(module.clone()));
    }
    for repo in &classification.metadata_candidates {
        expect(repo, Role::Candidate(repo.clone()));
    }

    let store = MirrorStore::new(workdir.mirrors(), workdir.tmp(), git);
    let mirrors = store.reconcile(&expected)?;

    let resolved = resolve_all(git, &mirrors, &roles)?;

    let mut framework = None;
    let mut modules = BTreeMap::new();
    let mut identified = Vec::new();
    for (key, version) in resolved {
        match &roles[&key] {
            Role::Framework => framework = Some(version),
            Role::Module(module) => {
                modules.insert(module.clone(), version);
            }
            Role::Candidate(repo) => identified.push((repo.clone(), version)),
        }
    }

    let mut unknown = classification.unknown;

    // Patterns take precedence; among identified repositories the first in
    // (owner, name) order wins.
    identified.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (repo, version) in identified {
        let Some(module) = version.module_id.clone() else {
            continue;
        };

        unknown.remove(&repo);
        match modules.get(&module) {
            Some(winner) => warn!(
                "Module provided by several repositories: module={} kept={} ignored={}",
                module, winner.remote, version.remote
            ),
            None => {
                info!("module.info names a module: module={} repo={}", module, repo);
                modules.insert(module, version);
            }
        }
    }

    let framework = framework.ok_or_else(|| Error::Mirror {
        path: store.root().display().to_string(),
        message: format!("no resolution for framework {}", github.framework),
    })?;

    let plan = BuildPlan { framework, modules };
    let script = assemble(&plan, &config.script);

    info!(
        "Assembled build script: modules={} unknown={}",
        plan.modules.len(),
        unknown.len()
    );

    Ok(BuildOutput {
        script,
        plan,
        unknown,
    })
}

/// Resolves every mirror concurrently, identifying candidates on the way.
fn resolve_all(
    git: &dyn GitOperations,
    mirrors: &BTreeMap<MirrorKey, MirrorEntry>,
    roles: &BTreeMap<MirrorKey, Role>,
) -> Result<BTreeMap<MirrorKey, ResolvedVersion>> {
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|s| {
        for (key, entry) in mirrors {
            let tx = tx.clone();
            let identify = matches!(roles.get(key), Some(Role::Candidate(_)));
            s.spawn(move || {
                let result = resolve_one(git, entry, identify).inspect_err(|e| {
                    error!(
                        "Couldn't resolve version: remote={} error={}",
                        entry.remote, e
                    );
                });
                let _ = tx.send((key.clone(), result));
            });
        }
    });
    drop(tx);

    let mut resolved = BTreeMap::new();
    let mut failed = 0;
    for (key, result) in rx {
        match result {
            Ok(version) => {
                resolved.insert(key, version);
            }
            Err(_) => failed += 1,
        }
    }

    if failed > 0 {
        return Err(Error::Batch {
            stage: "version resolutions",
            failed,
            total: mirrors.len(),
        });
    }

    Ok(resolved)
}

fn resolve_one(
    git: &dyn GitOperations,
    entry: &MirrorEntry,
    identify: bool,
) -> Result<ResolvedVersion> {
    let resolution = resolve(git, &entry.path, &entry.remote)?;
    let mut version = resolution.version;

    if identify {
        version.module_id =
            identify_with_fallback(git, &entry.path, &entry.remote, &resolution.selection)?;
    }

    Ok(version)
}
