//! # Bare Mirror Store
//!
//! The mirror store owns the `mirrors/` directory. Every entry is a bare git
//! repository whose `origin` remote is configured as mirror-fetch, named by the
//! [`MirrorKey`] of the remote it mirrors. Because the key is a pure function
//! of the remote, a mirror created in one cycle is reused (and merely fetched)
//! by every later cycle that still expects it.
//!
//! ## Reconciliation
//!
//! [`MirrorStore::reconcile`] brings the directory into exact correspondence
//! with an expected `MirrorKey -> remote` set:
//!
//! - every expected key gets its own thread that creates the mirror if needed
//!   and fetches it (`ensure_mirror`);
//! - one more thread lists the directory and deletes every entry that is not
//!   expected (`prune_obsolete`).
//!
//! The two passes touch disjoint sets of directories, so they run side by side.
//! A failing mirror does not cancel its siblings: every unit runs to
//! completion, and only then does the aggregate result turn into an error.
//! Deletion failures are logged but never fail the reconciliation.
//!
//! New mirrors are initialized in a temporary directory and renamed into
//! place, so a half-initialized mirror is never visible under its key.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use log::{debug, error, info, trace, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::git::GitOperations;

/// Filesystem-safe, collision-free directory name of a mirror.
///
/// The key is the lowercase hex encoding of the repository identifier, so it
/// only ever contains `[0-9a-f]` and distinct identifiers never share a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirrorKey(String);

impl MirrorKey {
    /// Key of the repository `owner/name`.
    pub fn for_repo(owner: &str, name: &str) -> Self {
        Self::for_identifier(&format!("{owner}/{name}"))
    }

    /// Key of an arbitrary repository identifier or URL.
    pub fn for_identifier(identifier: &str) -> Self {
        Self(hex::encode(identifier.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MirrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mirror that exists on disk and has just been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    /// URL the mirror fetches from.
    pub remote: String,
    /// Location of the bare repository.
    pub path: PathBuf,
}

/// Manages the set of bare mirrors below one root directory.
pub struct MirrorStore<'a> {
    root: PathBuf,
    temp_root: PathBuf,
    git: &'a dyn GitOperations,
}

impl<'a> MirrorStore<'a> {
    /// Creates a store keeping mirrors below `root` and staging new ones
    /// below `temp_root`.
    ///
    /// `temp_root` must exist; cleaning it between cycles is up to the caller.
    pub fn new(
        root: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
        git: &'a dyn GitOperations,
    ) -> Self {
        Self {
            root: root.into(),
            temp_root: temp_root.into(),
            git,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the mirror of `key` lives.
    pub fn mirror_path(&self, key: &MirrorKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Creates, fetches and prunes mirrors until the store holds exactly the
    /// `expected` set.
    ///
    /// Returns the fetched mirrors by key, or [`Error::Batch`] if any of them
    /// could not be created or fetched.
    pub fn reconcile(
        &self,
        expected: &BTreeMap<MirrorKey, String>,
    ) -> Result<BTreeMap<MirrorKey, MirrorEntry>> {
        debug!("Creating dir: path={}", self.root.display());
        fs::create_dir_all(&self.root).map_err(|e| {
            error!(
                "Couldn't create dir: path={} error={}",
                self.root.display(),
                e
            );
            Error::Mirror {
                path: self.root.display().to_string(),
                message: e.to_string(),
            }
        })?;

        let (tx, rx) = mpsc::channel();

        let (mirrors, failed, pruned) = std::thread::scope(|s| {
            let pruning = s.spawn(|| self.prune_obsolete(expected));

            for (key, remote) in expected {
                let tx = tx.clone();
                s.spawn(move || {
                    let path = self.mirror_path(key);
                    let result = self.ensure_mirror(remote, &path).map(|()| MirrorEntry {
                        remote: remote.clone(),
                        path,
                    });
                    // The receiver outlives every producer of this scope.
                    let _ = tx.send((key.clone(), result));
                });
            }
            drop(tx);

            let mut mirrors = BTreeMap::new();
            let mut failed = 0;
            for (key, result) in rx {
                match result {
                    Ok(entry) => {
                        mirrors.insert(key, entry);
                    }
                    Err(_) => failed += 1,
                }
            }

            let pruned = pruning.join().unwrap_or_else(|_| {
                warn!("Pruning obsolete mirrors panicked: path={}", self.root.display());
                0
            });

            (mirrors, failed, pruned)
        });

        trace!(
            "Reconciled mirrors: path={} fetched={} failed={} pruned={}",
            self.root.display(),
            mirrors.len(),
            failed,
            pruned
        );

        if failed > 0 || mirrors.len() != expected.len() {
            return Err(Error::Batch {
                stage: "mirror updates",
                failed: expected.len() - mirrors.len(),
                total: expected.len(),
            });
        }

        Ok(mirrors)
    }

    /// Makes sure a bare mirror of `remote` exists at `local` and fetches it.
    pub fn ensure_mirror(&self, remote: &str, local: &Path) -> Result<()> {
        info!(
            "Fetching Git repo: remote={} local={}",
            remote,
            local.display()
        );

        match fs::metadata(local) {
            // The remote of a key can change with the configured web prefix.
            Ok(_) => self.git.set_remote(local, remote)?,
            Err(e) if e.kind() == ErrorKind::NotFound => self.create_mirror(remote, local)?,
            Err(e) => {
                error!("Stat error: path={} error={}", local.display(), e);
                return Err(Error::Mirror {
                    path: local.display().to_string(),
                    message: e.to_string(),
                });
            }
        }

        self.git.fetch(local)
    }

    fn create_mirror(&self, remote: &str, local: &Path) -> Result<()> {
        debug!("Initializing Git repo: local={}", local.display());

        let staging = tempfile::Builder::new()
            .prefix("mirror-")
            .tempdir_in(&self.temp_root)
            .map_err(|e| {
                error!(
                    "Couldn't create temp dir: path={} error={}",
                    self.temp_root.display(),
                    e
                );
                Error::Mirror {
                    path: self.temp_root.display().to_string(),
                    message: e.to_string(),
                }
            })?;

        self.git.init_bare(staging.path())?;
        self.git.add_mirror_remote(staging.path(), remote)?;

        trace!(
            "Renaming: old={} new={}",
            staging.path().display(),
            local.display()
        );
        fs::rename(staging.path(), local).map_err(|e| {
            error!(
                "Couldn't rename: old={} new={} error={}",
                staging.path().display(),
                local.display(),
                e
            );
            Error::Mirror {
                path: local.display().to_string(),
                message: e.to_string(),
            }
        })?;

        // Dropping `staging` now is a no-op: its path has been moved away.
        Ok(())
    }

    /// Deletes every entry of the mirror root that is not in `expected`.
    ///
    /// Returns how many entries were removed. Failures are logged only.
    pub fn prune_obsolete(&self, expected: &BTreeMap<MirrorKey, String>) -> usize {
        trace!("Listing dir: path={}", self.root.display());

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    error!(
                        "Couldn't list dir: path={} error={}",
                        self.root.display(),
                        e
                    );
                }
                return 0;
            }
        };

        let keep: HashSet<&str> = expected.keys().map(MirrorKey::as_str).collect();

        let obsolete: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(
                        "Couldn't read dir entry: path={} error={}",
                        self.root.display(),
                        e
                    );
                    None
                }
            })
            .filter(|entry| !keep.contains(entry.file_name().to_string_lossy().as_ref()))
            .map(|entry| entry.path())
            .collect();

        obsolete.par_iter().filter(|path| remove_entry(path)).count()
    }
}

/// Removes a directory tree or file, logging instead of failing.
fn remove_entry(path: &Path) -> bool {
    info!("Removing dir: path={}", path.display());

    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Couldn't remove dir: path={} error={}", path.display(), e);
            false
        }
    }
}
